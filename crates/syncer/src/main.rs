#[tokio::main]
async fn main() {
    syncer::start(std::env::args()).await;
}
