//! Backend speaking plain HTTP with hand-signed SigV4 requests
//!
//! Listing goes through signed ListObjectsV2 requests whose XML `<Contents>`
//! records are handed on as field mappings (`Key`, `Size`, ...). Downloads use
//! presigned GET URLs.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Response};
use serde_json::{Map, Value};

use crate::config::{S3Config, DOWNLOAD_CONNECT_TIMEOUT, LIST_TIMEOUT, PROBE_TIMEOUT};
use crate::s3::backend::{probe_entry, Backend, ByteStream, PageStream};
use crate::s3::error::{mentions_no_such_bucket, BackendError};
use crate::s3::signer::{uri_encode, SignerV4};
use crate::s3::types::{IdentityInfo, ObjectEntry, RawEntry};

const LIST_PAGE_SIZE: usize = 1000;
const PRESIGN_EXPIRY_SECS: u64 = 3600;

/// One parsed ListObjectsV2 response
#[derive(Debug, Default)]
pub(crate) struct ListPage {
    pub entries: Vec<RawEntry>,
    pub next_token: Option<String>,
}

pub struct SigV4Backend {
    http: Client,
    s3_signer: SignerV4,
    sts_signer: SignerV4,
    bucket: String,
    bucket_url: String,
    sts_url: String,
}

impl SigV4Backend {
    pub fn new(config: &S3Config) -> Result<Self, BackendError> {
        let http = Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Setup(e.to_string()))?;

        let signer = |service: &str| {
            SignerV4::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
                config.session_token.clone(),
                config.region.clone(),
                service,
            )
        };

        Ok(Self {
            http,
            s3_signer: signer("s3"),
            sts_signer: signer("sts"),
            bucket: config.bucket.clone(),
            bucket_url: bucket_url(config),
            sts_url: sts_url(config),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url, uri_encode(key, false))
    }

    /// Fetch one ListObjectsV2 page
    async fn list_page(
        &self,
        token: Option<&str>,
        max_keys: usize,
    ) -> Result<ListPage, BackendError> {
        // Parameters must stay in canonical (sorted) order
        let mut query = String::new();
        if let Some(token) = token {
            query.push_str("continuation-token=");
            query.push_str(&uri_encode(token, true));
            query.push('&');
        }
        query.push_str(&format!("list-type=2&max-keys={}", max_keys));
        let url = format!("{}?{}", self.bucket_url, query);

        let timeout = if max_keys == 1 { PROBE_TIMEOUT } else { LIST_TIMEOUT };
        let response = self
            .send_signed(&self.s3_signer, &url, timeout)
            .await
            .map_err(BackendError::List)?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response, BackendError::List).await);
        }

        let body = response.text().await.map_err(|e| BackendError::List(e.to_string()))?;
        parse_list_response(&body).map_err(BackendError::List)
    }

    async fn send_signed(
        &self,
        signer: &SignerV4,
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Response, String> {
        let headers = signer.sign("GET", url);
        let mut request = self.http.get(url).timeout(timeout);
        for (name, value) in &headers {
            // reqwest derives the host header from the URL
            if name != "host" {
                request = request.header(name, value);
            }
        }
        request.send().await.map_err(|e| e.to_string())
    }

    /// Translate an S3 error response body into a backend error
    async fn error_from_response(
        &self,
        response: Response,
        kind: fn(String) -> BackendError,
    ) -> BackendError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let code = xml_text(&body, "Code");

        if code.as_deref().is_some_and(mentions_no_such_bucket) {
            return BackendError::BucketNotFound {
                bucket: self.bucket.clone(),
            };
        }

        let message = xml_text(&body, "Message").unwrap_or_default();
        kind(format!(
            "HTTP {}: {} {}",
            status,
            code.unwrap_or_default(),
            message
        )
        .trim_end()
        .to_string())
    }
}

#[async_trait]
impl Backend for SigV4Backend {
    fn name(&self) -> &'static str {
        "sigv4-http"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn check_identity(&self) -> Result<Option<IdentityInfo>, BackendError> {
        let response = self
            .send_signed(&self.sts_signer, &self.sts_url, PROBE_TIMEOUT)
            .await
            .map_err(BackendError::Auth)?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response, BackendError::Auth).await);
        }

        let body = response.text().await.map_err(|e| BackendError::Auth(e.to_string()))?;
        Ok(Some(IdentityInfo {
            account: xml_text(&body, "Account"),
            arn: xml_text(&body, "Arn"),
            user_id: xml_text(&body, "UserId"),
        }))
    }

    async fn probe_listing(&self) -> Result<Option<ObjectEntry>, BackendError> {
        let page = self.list_page(None, 1).await?;
        Ok(page.entries.first().map(probe_entry))
    }

    fn list_pages(&self) -> PageStream<'_> {
        futures::stream::try_unfold(Some(None::<String>), move |state| async move {
            let Some(token) = state else {
                return Ok::<_, BackendError>(None);
            };
            let page = self.list_page(token.as_deref(), LIST_PAGE_SIZE).await?;
            tracing::debug!(
                "sigv4-http page with {} entries, more: {}",
                page.entries.len(),
                page.next_token.is_some()
            );
            Ok::<_, BackendError>(Some((page.entries, page.next_token.map(Some))))
        })
        .boxed()
    }

    async fn fetch(&self, key: &str) -> Result<ByteStream, BackendError> {
        let url = self.s3_signer.presign_get(&self.object_url(key), PRESIGN_EXPIRY_SECS);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| BackendError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.error_from_response(response, BackendError::Fetch).await);
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| BackendError::Fetch(e.to_string()))
            .boxed())
    }
}

fn bucket_url(config: &S3Config) -> String {
    match (&config.endpoint_url, config.force_path_style) {
        (Some(endpoint), _) => format!("{}/{}", endpoint, config.bucket),
        (None, true) => format!("https://s3.{}.amazonaws.com/{}", config.region, config.bucket),
        (None, false) => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
    }
}

fn sts_url(config: &S3Config) -> String {
    let base = match &config.endpoint_url {
        Some(endpoint) => endpoint.clone(),
        None => format!("https://sts.{}.amazonaws.com", config.region),
    };
    format!("{}/?Action=GetCallerIdentity&Version=2011-06-15", base)
}

/// Parse a ListObjectsV2 XML body.
///
/// Each `<Contents>` element becomes a [`RawEntry::Mapping`] of its child
/// element names to their text.
pub(crate) fn parse_list_response(xml: &str) -> Result<ListPage, String> {
    // Text is kept untrimmed: keys may start or end with whitespace
    let mut reader = Reader::from_str(xml);

    let mut page = ListPage::default();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<Map<String, Value>> = None;
    // Text of the `<Contents>` child being read; `None` once it has children
    let mut field: Option<String> = None;
    let mut truncated = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if path.len() == 1 && name == "Contents" {
                    current = Some(Map::new());
                }
                path.push(name);
                field = (path.len() == 3 && current.is_some()).then(String::new);
            }
            Ok(Event::Empty(e)) => {
                if path.len() == 2 && current.is_some() {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if let Some(fields) = current.as_mut() {
                        fields.insert(name, Value::String(String::new()));
                    }
                }
                field = None;
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                match (path.len(), path.last().map(String::as_str)) {
                    (3, _) => {
                        if let Some(buf) = field.as_mut() {
                            buf.push_str(&text);
                        }
                    }
                    (2, Some("NextContinuationToken")) => {
                        page.next_token = Some(text.trim().to_string());
                    }
                    (2, Some("IsTruncated")) => truncated = text.trim() == "true",
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if path.len() == 3 {
                    if let (Some(text), Some(fields), Some(name)) =
                        (field.take(), current.as_mut(), path.last())
                    {
                        fields.insert(name.clone(), Value::String(text));
                    }
                }
                if path.len() == 2 && path.last().map(String::as_str) == Some("Contents") {
                    if let Some(fields) = current.take() {
                        page.entries.push(RawEntry::Mapping(fields));
                    }
                }
                path.pop();
                field = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("XML parse error at {}: {}", reader.error_position(), e)),
        }
    }

    if !truncated {
        page.next_token = None;
    }
    Ok(page)
}

/// Text of the first element with the given local name
pub(crate) fn xml_text(xml: &str, element: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut inside = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => inside = e.local_name().as_ref() == element.as_bytes(),
            Ok(Event::Text(t)) if inside => {
                return t.unescape().ok().map(|s| s.into_owned());
            }
            Ok(Event::End(_)) => inside = false,
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::types::classify;

    const LIST_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>example-bucket</Name>
  <Prefix></Prefix>
  <KeyCount>3</KeyCount>
  <MaxKeys>3</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
  <Contents>
    <Key>docs/</Key>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <Size>0</Size>
    <Owner><ID>abc</ID></Owner>
  </Contents>
  <Contents>
    <Key>docs/a &amp; b.txt</Key>
    <Size>1536</Size>
  </Contents>
  <Contents>
    <Key>root.txt</Key>
    <Size>12</Size>
  </Contents>
</ListBucketResult>"#;

    fn test_config() -> S3Config {
        S3Config::new(
            Some("AK".to_string()),
            Some("SK".to_string()),
            "eu-west-1",
            "my-bucket",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_list_response() {
        let page = parse_list_response(LIST_XML).unwrap();
        assert_eq!(page.entries.len(), 3);
        assert_eq!(
            page.next_token.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );

        let entries: Vec<_> = page
            .entries
            .iter()
            .map(|raw| classify(raw).entry().cloned().unwrap())
            .collect();
        assert_eq!(entries[0].key.as_deref(), Some("docs/"));
        assert_eq!(entries[0].size, Some(0));
        assert_eq!(entries[1].key.as_deref(), Some("docs/a & b.txt"));
        assert_eq!(entries[1].size, Some(1536));
        assert_eq!(entries[2].key.as_deref(), Some("root.txt"));
    }

    #[test]
    fn test_parse_list_response_nested_fields_ignored() {
        let page = parse_list_response(LIST_XML).unwrap();
        let RawEntry::Mapping(fields) = &page.entries[0] else {
            panic!("expected mapping");
        };
        assert!(fields.contains_key("LastModified"));
        assert!(!fields.contains_key("ID"));
    }

    #[test]
    fn test_parse_list_response_keeps_key_whitespace() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>
    false
  </IsTruncated>
  <Contents>
    <Key> padded.txt </Key>
    <Size>4</Size>
  </Contents>
  <Contents>
    <Key>   </Key>
    <Size>1</Size>
  </Contents>
</ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert!(page.next_token.is_none());

        let keys: Vec<Option<String>> = page
            .entries
            .iter()
            .map(|raw| classify(raw).entry().and_then(|e| e.key.clone()))
            .collect();
        assert_eq!(keys, vec![Some(" padded.txt ".to_string()), Some("   ".to_string())]);
    }

    #[test]
    fn test_parse_list_response_skips_parent_fields() {
        let page = parse_list_response(LIST_XML).unwrap();
        let RawEntry::Mapping(fields) = &page.entries[0] else {
            panic!("expected mapping");
        };
        assert!(!fields.contains_key("Owner"));
        assert_eq!(fields.get("Key"), Some(&Value::String("docs/".to_string())));
    }

    #[test]
    fn test_parse_list_response_last_page() {
        let xml = r#"<ListBucketResult><IsTruncated>false</IsTruncated>
            <Contents><Key>only.txt</Key><Size>1</Size></Contents></ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_parse_list_response_empty_bucket() {
        let xml = r#"<ListBucketResult><Name>b</Name><KeyCount>0</KeyCount>
            <IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert!(page.entries.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_xml_text() {
        let error = r#"<?xml version="1.0"?><Error><Code>NoSuchBucket</Code>
            <Message>The specified bucket does not exist</Message></Error>"#;
        assert_eq!(xml_text(error, "Code").as_deref(), Some("NoSuchBucket"));
        assert_eq!(
            xml_text(error, "Message").as_deref(),
            Some("The specified bucket does not exist")
        );
        assert_eq!(xml_text(error, "RequestId"), None);
    }

    #[test]
    fn test_xml_text_caller_identity() {
        let body = r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::123456789012:user/ci</Arn>
    <UserId>AIDAEXAMPLE</UserId>
    <Account>123456789012</Account>
  </GetCallerIdentityResult>
</GetCallerIdentityResponse>"#;
        assert_eq!(xml_text(body, "Account").as_deref(), Some("123456789012"));
        assert_eq!(xml_text(body, "Arn").as_deref(), Some("arn:aws:iam::123456789012:user/ci"));
        assert_eq!(xml_text(body, "UserId").as_deref(), Some("AIDAEXAMPLE"));
    }

    #[test]
    fn test_bucket_url_styles() {
        let config = test_config();
        assert_eq!(bucket_url(&config), "https://my-bucket.s3.eu-west-1.amazonaws.com");

        let local = test_config()
            .with_endpoint(Some("http://localhost:9000".to_string()))
            .unwrap();
        assert_eq!(bucket_url(&local), "http://localhost:9000/my-bucket");
        assert_eq!(
            sts_url(&local),
            "http://localhost:9000/?Action=GetCallerIdentity&Version=2011-06-15"
        );
    }

    #[test]
    fn test_object_url_encodes_segments() {
        let backend = SigV4Backend::new(&test_config()).unwrap();
        assert_eq!(
            backend.object_url("dir/with space/file+1.txt"),
            "https://my-bucket.s3.eu-west-1.amazonaws.com/dir/with%20space/file%2B1.txt"
        );
    }
}
