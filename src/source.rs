use std::fs::File;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::SourceConfig;
use crate::domain::Bucket;
use crate::error::GlmError;

/// Remote object store holding GLM files, organised by hour.
pub trait ObjectSource: Send + Sync {
    /// Raw keys under the bucket's hour prefix, in store order. An hour the
    /// store has never seen yields `GlmError::NotFound`.
    fn list(&self, bucket: &Bucket) -> Result<Vec<String>, GlmError>;

    /// Copies one object's bytes to `destination`.
    fn fetch(&self, key: &str, destination: &Path) -> Result<(), GlmError>;

    /// Cheap reachability check made once before any work starts.
    fn probe(&self) -> Result<(), GlmError> {
        Ok(())
    }
}

/// Anonymous access to a public S3 bucket over HTTPS (`ListObjectsV2` plus
/// plain GETs), e.g. `noaa-goes16`.
#[derive(Clone)]
pub struct S3HttpSource {
    client: Client,
    base_url: String,
    product: String,
}

impl S3HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self, GlmError> {
        reqwest::Url::parse(&config.base_url)
            .map_err(|err| GlmError::InvalidConfig(format!("source.base_url: {err}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("glm-agg/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GlmError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| GlmError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            product: config.product.clone(),
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        max_keys: Option<u32>,
    ) -> Result<ListPage, GlmError> {
        let mut request = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("list-type", "2"), ("prefix", prefix)]);
        if let Some(token) = continuation {
            request = request.query(&[("continuation-token", token)]);
        }
        if let Some(max_keys) = max_keys {
            request = request.query(&[("max-keys", max_keys.to_string())]);
        }
        let response = request
            .send()
            .map_err(|err| GlmError::Transport(err.to_string()))?;
        let response = handle_status(response, prefix)?;
        let body = response
            .text()
            .map_err(|err| GlmError::Transport(err.to_string()))?;
        Ok(parse_list_page(&body))
    }
}

impl ObjectSource for S3HttpSource {
    fn list(&self, bucket: &Bucket) -> Result<Vec<String>, GlmError> {
        let prefix = bucket.listing_prefix(&self.product);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_page(&prefix, continuation.as_deref(), None)?;
            keys.extend(page.keys);
            match page.next_token {
                Some(token) if page.truncated => continuation = Some(token),
                _ => break,
            }
        }
        if keys.is_empty() {
            return Err(GlmError::NotFound(prefix));
        }
        debug!(%bucket, count = keys.len(), "listed objects");
        Ok(keys)
    }

    fn fetch(&self, key: &str, destination: &Path) -> Result<(), GlmError> {
        let response = self
            .client
            .get(self.object_url(key))
            .send()
            .map_err(|err| GlmError::Transport(err.to_string()))?;
        let mut response = handle_status(response, key)?;
        let staging_err = |message: String| GlmError::Staging {
            path: destination.to_path_buf(),
            message,
        };
        let mut file = File::create(destination).map_err(|err| staging_err(err.to_string()))?;
        std::io::copy(&mut response, &mut file).map_err(|err| staging_err(err.to_string()))?;
        Ok(())
    }

    fn probe(&self) -> Result<(), GlmError> {
        let prefix = format!("{}/", self.product);
        self.list_page(&prefix, None, Some(1)).map(|_| ())
    }
}

fn handle_status(response: Response, what: &str) -> Result<Response, GlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(GlmError::NotFound(what.to_string()));
    }
    let message = response
        .text()
        .unwrap_or_else(|_| "object store request failed".to_string());
    Err(GlmError::Status {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub truncated: bool,
    pub next_token: Option<String>,
}

/// Pulls keys and pagination state out of a `ListBucketResult` document.
pub fn parse_list_page(body: &str) -> ListPage {
    let key_re = Regex::new(r"<Key>([^<]+)</Key>").unwrap();
    let token_re = Regex::new(r"<NextContinuationToken>([^<]+)</NextContinuationToken>").unwrap();
    let keys = key_re
        .captures_iter(body)
        .map(|caps| unescape_xml(&caps[1]))
        .collect();
    ListPage {
        keys,
        truncated: body.contains("<IsTruncated>true</IsTruncated>"),
        next_token: token_re
            .captures(body)
            .map(|caps| unescape_xml(&caps[1])),
    }
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_truncated_listing() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>noaa-goes16</Name>
  <Prefix>GLM-L2-LCFA/2023/322/14/</Prefix>
  <KeyCount>2</KeyCount>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1x/abc&amp;def</NextContinuationToken>
  <Contents><Key>GLM-L2-LCFA/2023/322/14/OR_GLM-L2-LCFA_G16_s20233221400000_e20233221400200_c20233221400221.nc</Key><Size>12</Size></Contents>
  <Contents><Key>GLM-L2-LCFA/2023/322/14/OR_GLM-L2-LCFA_G16_s20233221400200_e20233221400400_c20233221400421.nc</Key><Size>12</Size></Contents>
</ListBucketResult>"#;

        let page = parse_list_page(body);
        assert_eq!(page.keys.len(), 2);
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("1x/abc&def"));
    }

    #[test]
    fn parse_empty_listing() {
        let body = "<ListBucketResult><KeyCount>0</KeyCount><IsTruncated>false</IsTruncated></ListBucketResult>";
        assert_eq!(parse_list_page(body), ListPage::default());
    }

    #[test]
    fn object_url_joins_base_and_key() {
        let source = S3HttpSource::new(&SourceConfig::default()).unwrap();
        assert_eq!(
            source.object_url("GLM-L2-LCFA/2023/322/14/a.nc"),
            "https://noaa-goes16.s3.amazonaws.com/GLM-L2-LCFA/2023/322/14/a.nc"
        );
    }
}
