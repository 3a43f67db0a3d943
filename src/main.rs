#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wtb_assistant_lib::run().await
}
