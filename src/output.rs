use std::io::{self, Write};

use serde::Serialize;

use crate::density::GridCounts;
use crate::pipeline::{PlanReport, ProgressEvent, ProgressSink, RunReport};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_plan(plan: &PlanReport) -> io::Result<()> {
        Self::print_json(plan)
    }

    pub fn print_grid(grid: &GridCounts) -> io::Result<()> {
        Self::print_json(grid)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
