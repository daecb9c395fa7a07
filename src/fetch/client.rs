use async_trait::async_trait;
use reqwest::{Request, Response};

/// Transport seam for every upstream GET.
///
/// Production code uses [`super::BasicClient`]; tests substitute canned
/// responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
