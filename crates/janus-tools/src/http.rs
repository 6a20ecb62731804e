//! The `http_fetch` tool: plain GET requests with a response size cap.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use janus_core::{Result, Tool};

/// Response bytes returned to the model at most.
const RESPONSE_CAP: usize = 100 * 1024;

pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl HttpFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn name(&self) -> &str {
        "http_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL with an HTTP GET and return the response body \
         (truncated past 100 KB). For APIs and plain pages; no \
         authentication and no other methods."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The http(s) URL to fetch"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return Ok("Error: missing 'url' argument".into());
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok("Error: only http(s) URLs are supported".into());
        }

        debug!(url, "http_fetch");
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(format!("Error: request failed: {e}")),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Ok(format!("Error: failed to read response body: {e}")),
        };

        let mut body = body;
        if body.len() > RESPONSE_CAP {
            let total = body.len();
            let mut cut = RESPONSE_CAP;
            while cut > 0 && !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push_str(&format!("\n[response truncated, {total} bytes total]"));
        }

        if status.is_success() {
            Ok(body)
        } else {
            Ok(format!("Error: HTTP {status}\n{body}"))
        }
    }
}
