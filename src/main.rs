use quill_server::configuration::get_configuration;
use quill_server::startup::build;
use quill_server::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("starting quill-server");

    let configuration = match get_configuration() {
        Ok(configuration) => configuration,
        Err(e) => {
            tracing::error!("failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "configuration error",
            ));
        }
    };

    let server = build(configuration).await?;
    server.await
}
