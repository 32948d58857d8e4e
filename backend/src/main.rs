use server::error::AppError;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    server::start_server().await
}
