mod batch_processor;
mod clarifai_engine;
mod client;
mod config;
mod engine;
mod retry;
mod types;
mod validator;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use batch_processor::{BatchProcessor, RunSummary};
use client::ClassificationClient;
use config::{BatchConfig, ClientConfig, Config};
use validator::HttpUrlValidator;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);
    tracing::info!("Starting image tagger with config: {:?}", config);

    if let Some(address) = config.metrics_address {
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .context("Failed to install Prometheus exporter")?;
        tracing::info!("Metrics served on http://{}", address);
    }

    let processor = build_processor(&config)?;
    let summary = classify_file(&processor, &config.input, &config.output).await?;

    tracing::info!(
        summary = %serde_json::to_string(&summary)?,
        "Wrote {}",
        config.output.display()
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,image_tagger=debug".into()),
    );

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_processor(config: &Config) -> Result<BatchProcessor> {
    let batch_config = BatchConfig::from(config);

    let client = ClassificationClient::new(ClientConfig::from(config))?;
    let model = client.service().model();
    tracing::info!(
        model_id = %model.model_id,
        version_id = %model.version_id,
        "Classification client ready"
    );

    let validator = HttpUrlValidator::new(batch_config.validation_timeout)?;
    if !batch_config.validate_urls {
        tracing::info!("URL validation disabled");
    }

    Ok(BatchProcessor::new(
        batch_config,
        Arc::new(client),
        Arc::new(validator),
    ))
}

async fn classify_file(
    processor: &BatchProcessor,
    input: &Path,
    output: &Path,
) -> Result<RunSummary> {
    let input_file = File::open(input)
        .with_context(|| format!("Failed to open input file {}", input.display()))?;
    let output_file = File::create(output)
        .with_context(|| format!("Failed to create output file {}", output.display()))?;

    processor
        .run(BufReader::new(input_file), BufWriter::new(output_file))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn classifies_a_csv_file_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", mockito::Matcher::Any)
            .match_header("authorization", "Key test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"status": {"code": 10000, "description": "Ok"},
                    "outputs": [{"data": {"concepts": [
                        {"name": "cat", "value": 0.95},
                        {"name": "pet", "value": 0.8}
                    ]}}]}"#,
            )
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input_images.csv");
        let output = dir.path().join("classified_images.csv");
        std::fs::write(&input, "https://img/1.jpg\n,\nhttps://img/2.jpg\n").unwrap();

        let api_base = server.url();
        let config = Config::try_parse_from([
            "image-tagger",
            "--api-key",
            "test-key",
            "--api-base",
            api_base.as_str(),
            "--skip-url-validation",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ])
        .unwrap();

        let processor = build_processor(&config).unwrap();
        let summary = classify_file(&processor, &config.input, &config.output)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&output).unwrap();
        let mut lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.remove(0), "IMAGE_URL,TAGS,Confidence Scores");
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "https://img/1.jpg,cat;pet,0.95;0.8",
                "https://img/2.jpg,cat;pet,0.95;0.8",
            ]
        );
        assert_eq!(summary.rows_written, 2);
        assert_eq!(summary.rows_skipped, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_input_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::try_parse_from(["image-tagger", "--api-key", "k"]).unwrap();
        let processor = build_processor(&config).unwrap();

        let error = classify_file(
            &processor,
            &dir.path().join("missing.csv"),
            &dir.path().join("out.csv"),
        )
        .await
        .unwrap_err();
        assert!(error.to_string().contains("Failed to open input file"));
    }
}
