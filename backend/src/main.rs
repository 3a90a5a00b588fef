mod config;
mod inference;
mod loader;
mod routes;
mod storage;

use actix_web::{web, App, HttpServer};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client as S3Client;
use config::{ServiceConfig, WeightSourceConfig};
use inference::model::{ModelHandle, TorchScorer};
use loader::ModelLoader;
use routes::{configure_routes, cors_policy};
use storage::s3_service::{S3ModelObject, S3Service};
use storage::LocalWeightFile;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServiceConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(e)
    })?;
    log::info!(
        "Allowed origins: {:?}, on model load failure: {}",
        config.allowed_origins,
        config.serving.on_model_load_failure
    );

    let device = tch::Device::cuda_if_available();
    log::info!("Running inference on {:?}", device);
    let scorer = TorchScorer::untrained(device).map_err(|e| {
        log::error!("Cannot build the untrained network: {}", e);
        std::io::Error::other(e)
    })?;
    let mut model = ModelHandle::new(Box::new(scorer));

    let loader = ModelLoader::new(config.model.scratch_path.clone());
    match &config.model.source {
        WeightSourceConfig::S3 {
            bucket,
            key,
            region,
        } => {
            let mut aws = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                aws = aws.region(Region::new(region.clone()));
            }
            let s3_client = S3Client::new(&aws.load().await);
            let object = S3ModelObject::new(S3Service::new(s3_client, bucket.clone()), key.clone());
            loader.load_into(&object, &mut model).await;
        }
        WeightSourceConfig::Local { path } => {
            loader.load_into(&LocalWeightFile::new(path), &mut model).await;
        }
    }

    if !model.is_loaded() {
        log::warn!(
            "Serving without trained weights (model is {}); predictions are meaningless",
            model.state()
        );
    }

    let model = web::Data::new(model);
    let serving = web::Data::new(config.serving.clone());
    let allowed_origins = config.allowed_origins.clone();
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(cors_policy(&allowed_origins))
            .app_data(model.clone())
            .app_data(serving.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
