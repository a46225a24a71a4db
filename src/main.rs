#[tokio::main]
async fn main() {
    notify_dispatch::start_service().await;
}
