use crate::credentials::AwsCredentials;
use crate::error::{Result, StorageError};
use crate::location::validate_key;
use crate::ObjectStore;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

/// S3 connection settings.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    /// AWS region (optional; falls back to environment configuration).
    pub region: Option<String>,
    /// Custom endpoint URL (for S3-compatible stores).
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    /// Explicit keys; the default provider chain is used when absent.
    pub credentials: Option<AwsCredentials>,
}

/// Object store backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn connect(config: S3Config) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::invalid("bucket name is required"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let Some(creds) = &config.credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                None,
                None,
                "mindar",
            ));
        }
        let shared_config = loader.load().await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }
        let client = Client::from_conf(s3_builder.build());

        info!(bucket = %config.bucket, "S3 object store ready");
        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|err| sdk_error("list", prefix, err))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(next) if output.is_truncated().unwrap_or(false) => {
                    token = Some(next.to_string());
                }
                _ => break,
            }
        }

        debug!(bucket = %self.bucket, prefix, count = keys.len(), "Listed objects");
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key())
                {
                    StorageError::not_found(self.uri(key))
                } else {
                    sdk_error("get", key, err)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Backend(format!("read {}: {}", key, err)))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| sdk_error("put", key, err))?;
        debug!(bucket = %self.bucket, key, "Object stored");
        Ok(())
    }
}

fn sdk_error<E, R>(op: &str, key: &str, err: SdkError<E, R>) -> StorageError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{} {}: {}", op, key, DisplayErrorContext(&err));
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StorageError::Connection(detail)
        }
        _ => StorageError::Backend(detail),
    }
}
