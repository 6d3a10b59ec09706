//! Amazon S3 (and S3-compatible) backend.

use std::path::Path;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    AccessControlPolicy, CompletedMultipartUpload, CompletedPart as S3CompletedPart,
    MetadataDirective,
};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::store::{CompletedPart, KeyPage, ObjectMetadata, ObjectStore, StoreError, StoreResult};

/// Default region when none is configured.
pub const DEFAULT_REGION: &str = "eu-west-1";

/// Connection settings for an S3 bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub key: String,
    pub secret: String,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (`MinIO`, `LocalStack`).
    pub endpoint: Option<String>,
}

impl S3Settings {
    /// Check that credentials and bucket are present.
    ///
    /// # Errors
    ///
    /// Returns `Config` naming every missing field.
    pub fn validate(&self) -> StoreResult<()> {
        let missing: Vec<&str> = [
            ("key", &self.key),
            ("secret", &self.secret),
            ("bucket", &self.bucket),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Config(format!(
                "missing S3 {}",
                missing.join(", ")
            )))
        }
    }
}

/// Object store backed by an S3 bucket.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
}

impl S3Store {
    /// Build a client from explicit credentials.
    ///
    /// No request is made here; a bad key surfaces on the first call.
    ///
    /// # Errors
    ///
    /// Returns `Config` if credentials or bucket are missing.
    pub fn new(settings: &S3Settings) -> StoreResult<Self> {
        settings.validate()?;

        let credentials = Credentials::new(
            settings.key.clone(),
            settings.secret.clone(),
            None,
            None,
            "oai-harvest",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
            endpoint: settings.endpoint.clone(),
        })
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn request_error<E>(operation: &str, key: &str, err: E) -> StoreError
where
    E: std::error::Error + 'static,
{
    StoreError::Request(format!("{operation} {key}: {}", DisplayErrorContext(err)))
}

impl ObjectStore for S3Store {
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> StoreResult<KeyPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| request_error("list", prefix, e))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_string))
            .collect();
        Ok(KeyPage {
            keys,
            next: output.next_continuation_token().map(str::to_string),
        })
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> StoreResult<()> {
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(GetObjectError::is_no_such_key) {
                    StoreError::NotFound(key.to_string())
                } else {
                    request_error("get", key, e)
                }
            })?;

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(bytes) = object
            .body
            .try_next()
            .await
            .map_err(|e| request_error("read", key, e))?
        {
            file.write_all(&bytes).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn put_from_file(&self, key: &str, src: &Path) -> StoreResult<()> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| request_error("read", &src.display().to_string(), e))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| request_error("put", key, e))?;
        Ok(())
    }

    async fn create_multipart(&self, key: &str) -> StoreResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("create multipart", key, e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Request(format!("no upload id returned for {key}")))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StoreResult<CompletedPart> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("upload part", key, e))?;

        let etag = output
            .e_tag()
            .ok_or_else(|| StoreError::Request(format!("no ETag for part {part_number} of {key}")))?;
        debug!(key, part = part_number, etag, "Uploaded part");
        Ok(CompletedPart {
            part_number,
            etag: etag.to_string(),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<()> {
        let parts = parts
            .into_iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| request_error("complete multipart", key, e))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| request_error("abort multipart", key, e))?;
        Ok(())
    }

    async fn replace_metadata(&self, key: &str, metadata: &ObjectMetadata) -> StoreResult<()> {
        // A metadata-replacing copy resets the ACL, so capture it first.
        let acl = self
            .client
            .get_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("get acl", key, e))?;

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(key)
            .copy_source(format!("{}/{key}", self.bucket))
            .metadata_directive(MetadataDirective::Replace)
            .content_type(&metadata.content_type)
            .content_disposition(&metadata.content_disposition)
            .send()
            .await
            .map_err(|e| request_error("copy", key, e))?;

        let policy = AccessControlPolicy::builder()
            .set_grants(Some(acl.grants().to_vec()))
            .set_owner(acl.owner().cloned())
            .build();
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .access_control_policy(policy)
            .send()
            .await
            .map_err(|e| request_error("put acl", key, e))?;
        Ok(())
    }

    async fn object_size(&self, key: &str) -> StoreResult<u64> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(HeadObjectError::is_not_found) {
                    StoreError::NotFound(key.to_string())
                } else {
                    request_error("head", key, e)
                }
            })?;

        output
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| StoreError::Request(format!("no content length for {key}")))
    }

    fn public_url(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{key}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("http://{}.s3.amazonaws.com/{key}", self.bucket),
        }
    }
}
