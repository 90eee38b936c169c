use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    booking_pilot::cli::app::run().await
}
