/// Content fetched from a remote document URL. A non-success status is data,
/// not an error, so callers can decide skip-vs-fail policy; transport
/// failures surface as errors.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedDocument {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedDocument>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedDocument> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(FetchedDocument { status, body })
    }
}
