use crate::{
    auth::FirebaseTokenVerifier,
    aws_clients::{create_dynamodb_client, create_s3_client, create_sdk_config},
    config::{AwsSettings, Config, StoreBackend},
    domain::{FileStorage, MemeRepository},
    errors::AppError,
    memory::{InMemoryFileStorage, InMemoryMemeRepository},
    repositories::DynamoDbMemeRepository,
    storage::S3FileStorage,
    AppState,
};
use aws_sdk_dynamodb::{
    types::{AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType},
    Client as DynamoDbClient, error::SdkError as DynamoSdkError,
};
use aws_sdk_s3::{
    types::{BucketLocationConstraint, CreateBucketConfiguration},
    Client as S3Client, error::SdkError as S3SdkError,
};
use aws_smithy_types::error::{display::DisplayErrorContext, operation::BuildError};
use std::sync::Arc;
use tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes tracing (logging) with an `EnvFilter` read from `RUST_LOG`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_error(what: &str, e: BuildError) -> AppError {
    AppError::InitError(format!("Failed to build {}: {}", what, e))
}

fn init_failure(resource: &str, name: &str, e: impl std::fmt::Display) -> AppError {
    tracing::error!(%resource, %name, error = %e, "Startup: failed to provision resource");
    AppError::InitError(format!("Startup: could not create {} '{}': {}", resource, name, e))
}

/// Creates the meme table, keyed by `meme_id`. An existing table is left alone.
async fn ensure_meme_table(client: &DynamoDbClient, table_name: &str) -> Result<(), AppError> {
    let key = "meme_id";
    let result = client
        .create_table()
        .table_name(table_name)
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(key)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .map_err(|e| build_error("attribute definition", e))?,
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(key)
                .key_type(KeyType::Hash)
                .build()
                .map_err(|e| build_error("key schema", e))?,
        )
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await;

    match result {
        Ok(_) => tracing::info!(table = %table_name, "Startup: table created"),
        Err(DynamoSdkError::ServiceError(service_err)) if service_err.err().is_resource_in_use_exception() => {
            tracing::info!(table = %table_name, "Startup: table already exists")
        }
        Err(e) => return Err(init_failure("DynamoDB table", table_name, DisplayErrorContext(e))),
    }
    Ok(())
}

/// Creates the image bucket outside us-east-1 with a matching location constraint.
async fn ensure_image_bucket(client: &S3Client, bucket_name: &str, region: &str) -> Result<(), AppError> {
    let mut request = client.create_bucket().bucket(bucket_name);
    if region != "us-east-1" {
        request = request.create_bucket_configuration(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region))
                .build(),
        );
    }

    match request.send().await {
        Ok(_) => tracing::info!(bucket = %bucket_name, "Startup: bucket created"),
        Err(S3SdkError::ServiceError(service_err))
            if service_err.err().is_bucket_already_owned_by_you() || service_err.err().is_bucket_already_exists() =>
        {
            tracing::info!(bucket = %bucket_name, "Startup: bucket already exists")
        }
        Err(e) => return Err(init_failure("S3 bucket", bucket_name, DisplayErrorContext(e))),
    }
    Ok(())
}

/// Provisions the table and bucket the DynamoDB/S3 store needs.
pub async fn init_resources(
    db_client: &DynamoDbClient,
    s3_client: &S3Client,
    settings: &AwsSettings,
) -> Result<(), AppError> {
    tracing::info!("Startup: Initializing AWS resources...");
    ensure_meme_table(db_client, &settings.table_name).await?;
    ensure_image_bucket(s3_client, &settings.bucket_name, &settings.region).await?;
    tracing::info!("Startup: AWS resource initialization complete.");
    Ok(())
}

/// Builds the shared state: storage backends per `STORE_BACKEND` plus the token verifier.
pub async fn build_state(config: &Config) -> Result<Arc<AppState>, AppError> {
    let (meme_repo, file_storage): (Arc<dyn MemeRepository>, Arc<dyn FileStorage>) = match &config.store {
        StoreBackend::DynamoDb(settings) => {
            tracing::info!(table = %settings.table_name, bucket = %settings.bucket_name, "Using DynamoDB/S3 meme store");
            let sdk_config = create_sdk_config(settings).await;
            let db_client = create_dynamodb_client(&sdk_config);
            let s3_client = create_s3_client(&sdk_config);
            init_resources(&db_client, &s3_client, settings).await?;
            (
                Arc::new(DynamoDbMemeRepository::new(db_client, settings.table_name.clone())),
                Arc::new(S3FileStorage::new(s3_client, settings.bucket_name.clone())),
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory meme store; memes are lost on restart");
            (
                Arc::new(InMemoryMemeRepository::new()),
                Arc::new(InMemoryFileStorage::new()),
            )
        }
    };

    let verifier = FirebaseTokenVerifier::new(
        config.auth.firebase_project_id.clone(),
        config.auth.jwks_url.clone(),
    );

    Ok(Arc::new(AppState {
        meme_repo,
        file_storage,
        verifier: Arc::new(verifier),
        settings: config.api.clone(),
    }))
}
