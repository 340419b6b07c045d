use anyhow::Context;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::errors::FaasrError;

/// `owner/repo/branch/path/to/file.json`, the shape `PAYLOAD_URL` takes
/// when it names a file in a GitHub repository rather than a bare URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: String,
}

impl GithubRef {
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.splitn(4, '/');
        let owner = parts.next()?.to_string();
        let repo = parts.next()?.to_string();
        let branch = parts.next()?.to_string();
        let path = parts.next()?.to_string();
        if owner.is_empty() || repo.is_empty() || branch.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            owner,
            repo,
            branch,
            path,
        })
    }

    pub fn contents_url(&self) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/contents/{}?ref={}",
            self.owner, self.repo, self.path, self.branch
        )
    }
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    encoding: String,
}

/// Fetches the workflow payload named by `PAYLOAD_URL`.
///
/// `payload_url` is either a bare `https://...` URL served as raw JSON,
/// or a `owner/repo/branch/path` reference resolved through GitHub's
/// Contents API, whose response wraps the file body as base64. Mirrors
/// `faasr_get_github_raw` in the Python original.
pub async fn fetch_payload(
    client: &reqwest::Client,
    payload_url: &str,
    token: Option<&str>,
) -> anyhow::Result<JsonValue> {
    let body = if let Some(gh) = GithubRef::parse(payload_url) {
        fetch_via_contents_api(client, &gh, token).await?
    } else {
        fetch_via_plain_url(client, payload_url, token).await?
    };

    serde_json::from_str(&body).with_context(|| {
        FaasrError::payload_fetch(format!("payload at {payload_url} is not valid JSON"))
    })
}

async fn fetch_via_contents_api(
    client: &reqwest::Client,
    gh: &GithubRef,
    token: Option<&str>,
) -> anyhow::Result<String> {
    let mut req = client
        .get(gh.contents_url())
        .header("User-Agent", "faasr-runtime")
        .header("Accept", "application/vnd.github.v3+json");
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }

    let resp = req
        .send()
        .await
        .with_context(|| FaasrError::payload_fetch(format!("request to {} failed", gh.contents_url())))?;

    if !resp.status().is_success() {
        return Err(FaasrError::payload_fetch(format!(
            "GitHub contents API returned {} for {}/{}/{}",
            resp.status(),
            gh.owner,
            gh.repo,
            gh.path
        ))
        .into());
    }

    let parsed: ContentsResponse = resp
        .json()
        .await
        .with_context(|| FaasrError::payload_fetch("malformed GitHub contents API response"))?;

    if parsed.encoding != "base64" {
        return Err(FaasrError::payload_fetch(format!(
            "unsupported GitHub contents encoding {}",
            parsed.encoding
        ))
        .into());
    }

    let stripped: String = parsed.content.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(stripped)
        .with_context(|| FaasrError::payload_fetch("payload content is not valid base64"))?;

    String::from_utf8(decoded)
        .with_context(|| FaasrError::payload_fetch("payload content is not valid UTF-8"))
}

async fn fetch_via_plain_url(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
) -> anyhow::Result<String> {
    let mut req = client.get(url).header("User-Agent", "faasr-runtime");
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }

    let resp = req
        .send()
        .await
        .with_context(|| FaasrError::payload_fetch(format!("request to {url} failed")))?;

    if !resp.status().is_success() {
        return Err(FaasrError::payload_fetch(format!(
            "{url} returned {}",
            resp.status()
        ))
        .into());
    }

    resp.text()
        .await
        .with_context(|| FaasrError::payload_fetch(format!("failed reading body of {url}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_repo_branch_path() {
        let parsed = GithubRef::parse("acme/workflows/main/flows/a.json").unwrap();
        assert_eq!(parsed.owner, "acme");
        assert_eq!(parsed.repo, "workflows");
        assert_eq!(parsed.branch, "main");
        assert_eq!(parsed.path, "flows/a.json");
    }

    #[test]
    fn rejects_too_few_segments() {
        assert!(GithubRef::parse("acme/workflows").is_none());
    }

    #[test]
    fn plain_https_url_is_not_a_github_ref() {
        assert!(GithubRef::parse("https://example.com/a.json").is_none());
    }
}
