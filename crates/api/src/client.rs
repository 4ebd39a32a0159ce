//! HTTP facade for the network's profile and list endpoints.

use std::time::Duration;

use lk_domain::{Did, Error, Profile, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::retry::{retry_once_after_reauth, retry_transient};

/// Credentials loaded from the YAML credentials file (`id`/`pass`).
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub id: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
struct Session {
    access_jwt: String,
    refresh_jwt: String,
    #[allow(dead_code)]
    did: String,
}

/// An authenticated or anonymous handle onto the remote API. Each
/// pipeline worker owns its own instance to avoid token-refresh
/// contention; anonymous clients may be shared freely.
pub struct ApiClient {
    http: reqwest::Client,
    host: String,
    credentials: Option<Credentials>,
    session: Mutex<Option<Session>>,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    #[serde(rename = "refreshJwt")]
    refresh_jwt: String,
    did: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfilesResponse {
    profiles: Vec<WireProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProfile {
    did: String,
    handle: Option<String>,
    display_name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    follows_count: u64,
    #[serde(default)]
    followers_count: u64,
}

impl From<WireProfile> for Profile {
    fn from(w: WireProfile) -> Self {
        Profile {
            did: w.did.into(),
            handle: w.handle,
            display_name: w.display_name,
            description: w.description,
            follows_count: w.follows_count,
            followers_count: w.followers_count,
            cached_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListsResponse {
    lists: Vec<WireList>,
}

#[derive(Debug, Deserialize)]
struct WireList {
    uri: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListMembersResponse {
    items: Vec<WireListItem>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireListItem {
    uri: String,
    subject: WireListSubject,
}

#[derive(Debug, Deserialize)]
struct WireListSubject {
    did: String,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a, T: Serialize> {
    repo: &'a str,
    collection: &'a str,
    record: T,
}

#[derive(Debug, Serialize)]
struct ListRecord<'a> {
    #[serde(rename = "$type")]
    type_: &'a str,
    purpose: &'a str,
    name: &'a str,
    description: &'a str,
    #[serde(rename = "createdAt")]
    created_at: String,
}

#[derive(Debug, Serialize)]
struct ListItemRecord<'a> {
    #[serde(rename = "$type")]
    type_: &'a str,
    subject: &'a str,
    list: &'a str,
    #[serde(rename = "createdAt")]
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

impl ApiClient {
    pub fn new(host: impl Into<String>, credentials: Option<Credentials>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            host: host.into(),
            credentials,
            session: Mutex::new(None),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.host.trim_end_matches('/'), method)
    }

    fn access_jwt(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.access_jwt.clone())
    }

    fn did(&self) -> Result<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.did.clone())
            .ok_or_else(|| Error::Auth("not authenticated".into()))
    }

    async fn authenticate(&self) -> Result<()> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Auth("no credentials configured".into()))?;
        let resp = self
            .http
            .post(self.url("com.atproto.server.createSession"))
            .json(&serde_json::json!({ "identifier": creds.id, "password": creds.pass }))
            .send()
            .await
            .map_err(from_reqwest)?;
        let resp = handle_status(resp).await?;
        let body: CreateSessionResponse = resp.json().await.map_err(from_reqwest)?;
        *self.session.lock() = Some(Session {
            access_jwt: body.access_jwt,
            refresh_jwt: body.refresh_jwt,
            did: body.did,
        });
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        let refresh_jwt = {
            let guard = self.session.lock();
            guard.as_ref().map(|s| s.refresh_jwt.clone())
        };
        let Some(refresh_jwt) = refresh_jwt else {
            return self.authenticate().await;
        };
        let resp = self
            .http
            .post(self.url("com.atproto.server.refreshSession"))
            .bearer_auth(refresh_jwt)
            .send()
            .await
            .map_err(from_reqwest)?;
        let resp = match handle_status(resp).await {
            Ok(r) => r,
            Err(_) => return self.authenticate().await,
        };
        let body: CreateSessionResponse = resp.json().await.map_err(from_reqwest)?;
        *self.session.lock() = Some(Session {
            access_jwt: body.access_jwt,
            refresh_jwt: body.refresh_jwt,
            did: body.did,
        });
        Ok(())
    }

    fn authed_get(&self, method: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(self.url(method));
        if let Some(jwt) = self.access_jwt() {
            req = req.bearer_auth(jwt);
        }
        req
    }

    fn authed_post(&self, method: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.post(self.url(method));
        if let Some(jwt) = self.access_jwt() {
            req = req.bearer_auth(jwt);
        }
        req
    }

    /// Batched profile fetch. `dids` must contain at most 25 entries.
    pub async fn get_profiles(&self, dids: &[Did]) -> Result<Vec<Profile>> {
        if dids.len() > 25 {
            return Err(Error::Other(format!(
                "get_profiles: batch of {} exceeds the 25-DID limit",
                dids.len()
            )));
        }
        let actors: Vec<&str> = dids.iter().map(|d| d.as_str()).collect();
        retry_once_after_reauth(
            || async {
                retry_transient(|| async {
                    let resp = self
                        .authed_get("app.bsky.actor.getProfiles")
                        .query(&actors.iter().map(|a| ("actors", *a)).collect::<Vec<_>>())
                        .send()
                        .await
                        .map_err(from_reqwest)?;
                    let resp = handle_status(resp).await?;
                    let body: ProfilesResponse = resp.json().await.map_err(from_reqwest)?;
                    Ok(body.profiles.into_iter().map(Profile::from).collect())
                })
                .await
            },
            || self.refresh(),
        )
        .await
    }

    pub async fn get_profile(&self, did: &Did) -> Result<Profile> {
        retry_once_after_reauth(
            || async {
                retry_transient(|| async {
                    let resp = self
                        .authed_get("app.bsky.actor.getProfile")
                        .query(&[("actor", did.as_str())])
                        .send()
                        .await
                        .map_err(from_reqwest)?;
                    let resp = handle_status(resp).await?;
                    let body: WireProfile = resp.json().await.map_err(from_reqwest)?;
                    Ok(Profile::from(body))
                })
                .await
            },
            || self.refresh(),
        )
        .await
    }

    pub async fn create_list(&self, name: &str, description: &str) -> Result<String> {
        retry_once_after_reauth(
            || async {
                retry_transient(|| async {
                    let did = self.did()?;
                    let record = ListRecord {
                        type_: "app.bsky.graph.list",
                        purpose: "app.bsky.graph.defs#modlist",
                        name,
                        description,
                        created_at: chrono::Utc::now().to_rfc3339(),
                    };
                    let resp = self
                        .authed_post("com.atproto.repo.createRecord")
                        .json(&CreateRecordRequest {
                            repo: &did,
                            collection: "app.bsky.graph.list",
                            record,
                        })
                        .send()
                        .await
                        .map_err(from_reqwest)?;
                    let resp = handle_status(resp).await?;
                    let body: CreateRecordResponse = resp.json().await.map_err(from_reqwest)?;
                    Ok(body.uri)
                })
                .await
            },
            || self.refresh(),
        )
        .await
    }

    pub async fn list_my_lists(&self) -> Result<Vec<(String, String)>> {
        retry_once_after_reauth(
            || async {
                retry_transient(|| async {
                    let did = self.did()?;
                    let resp = self
                        .authed_get("app.bsky.graph.getLists")
                        .query(&[("actor", did.as_str())])
                        .send()
                        .await
                        .map_err(from_reqwest)?;
                    let resp = handle_status(resp).await?;
                    let body: ListsResponse = resp.json().await.map_err(from_reqwest)?;
                    Ok(body.lists.into_iter().map(|l| (l.name, l.uri)).collect())
                })
                .await
            },
            || self.refresh(),
        )
        .await
    }

    /// Deletes the list record itself (not a membership). Used by the
    /// `delete-list` CLI subcommand; the core pipeline never calls this.
    pub async fn delete_list(&self, uri: &str) -> Result<()> {
        let rkey = rkey_of(uri);
        retry_once_after_reauth(
            || async {
                retry_transient(|| async {
                    let repo = self.did()?;
                    let resp = self
                        .authed_post("com.atproto.repo.deleteRecord")
                        .json(&serde_json::json!({
                            "repo": repo,
                            "collection": "app.bsky.graph.list",
                            "rkey": rkey,
                        }))
                        .send()
                        .await
                        .map_err(from_reqwest)?;
                    handle_status(resp).await?;
                    Ok(())
                })
                .await
            },
            || self.refresh(),
        )
        .await
    }

    /// Materializes the full (paginated) membership of a list.
    pub async fn list_members(&self, uri: &str) -> Result<Vec<(Did, String)>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = retry_once_after_reauth(
                || async {
                    retry_transient(|| async {
                        let mut req = self
                            .authed_get("app.bsky.graph.getList")
                            .query(&[("list", uri)]);
                        if let Some(c) = &cursor {
                            req = req.query(&[("cursor", c.as_str())]);
                        }
                        let resp = req.send().await.map_err(from_reqwest)?;
                        let resp = handle_status(resp).await?;
                        let body: ListMembersResponse = resp.json().await.map_err(from_reqwest)?;
                        Ok(body)
                    })
                    .await
                },
                || self.refresh(),
            )
            .await?;

            for item in page.items {
                out.push((item.subject.did.into(), rkey_of(&item.uri)));
            }
            match page.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl lk_registry::MembershipApi for ApiClient {
    async fn create_member(&self, list_uri: &str, did: &Did) -> Result<String> {
        let list_uri = list_uri.to_string();
        let did = did.clone();
        retry_once_after_reauth(
            || async {
                retry_transient(|| async {
                    let repo = self.did()?;
                    let record = ListItemRecord {
                        type_: "app.bsky.graph.listitem",
                        subject: did.as_str(),
                        list: &list_uri,
                        created_at: chrono::Utc::now().to_rfc3339(),
                    };
                    let resp = self
                        .authed_post("com.atproto.repo.createRecord")
                        .json(&CreateRecordRequest {
                            repo: &repo,
                            collection: "app.bsky.graph.listitem",
                            record,
                        })
                        .send()
                        .await
                        .map_err(from_reqwest)?;
                    let resp = handle_status(resp).await?;
                    let body: CreateRecordResponse = resp.json().await.map_err(from_reqwest)?;
                    Ok(rkey_of(&body.uri))
                })
                .await
            },
            || self.refresh(),
        )
        .await
    }

    async fn delete_member(&self, rkey: &str) -> Result<()> {
        let rkey = rkey.to_string();
        retry_once_after_reauth(
            || async {
                retry_transient(|| async {
                    let repo = self.did()?;
                    let resp = self
                        .authed_post("com.atproto.repo.deleteRecord")
                        .json(&serde_json::json!({
                            "repo": repo,
                            "collection": "app.bsky.graph.listitem",
                            "rkey": rkey,
                        }))
                        .send()
                        .await
                        .map_err(from_reqwest)?;
                    handle_status(resp).await?;
                    Ok(())
                })
                .await
            },
            || self.refresh(),
        )
        .await
    }
}

fn rkey_of(at_uri: &str) -> String {
    at_uri.rsplit('/').next().unwrap_or(at_uri).to_string()
}

fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() {
        Error::Dns(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Translate an HTTP response's status into the error taxonomy,
/// recognizing the documented terminal-account error codes.
async fn handle_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let status_code = status.as_u16();
    let body: ErrorBody = resp.json().await.unwrap_or(ErrorBody {
        error: None,
        message: None,
    });
    let code = body.error.clone();
    let message = body.message.unwrap_or_else(|| status.to_string());

    if status_code == 401 {
        return Err(Error::Auth(message));
    }
    if is_terminal_account_error(code.as_deref(), &message) {
        return Err(Error::TerminalAccount {
            did: String::new(),
            reason: message,
        });
    }
    Err(Error::ApiClient {
        status: status_code,
        code,
        message,
    })
}

fn is_terminal_account_error(code: Option<&str>, message: &str) -> bool {
    matches!(code, Some("AccountDeactivated") | Some("AccountTakedown"))
        || message.contains("Profile not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rkey_extracts_trailing_segment() {
        assert_eq!(
            rkey_of("at://did:plc:abc/app.bsky.graph.listitem/3k2z"),
            "3k2z"
        );
    }

    #[test]
    fn terminal_account_detection_by_code() {
        assert!(is_terminal_account_error(Some("AccountTakedown"), "gone"));
        assert!(is_terminal_account_error(Some("AccountDeactivated"), "gone"));
    }

    #[test]
    fn terminal_account_detection_by_message() {
        assert!(is_terminal_account_error(
            Some("InvalidRequest"),
            "Profile not found"
        ));
    }

    #[test]
    fn non_terminal_client_error_is_not_flagged() {
        assert!(!is_terminal_account_error(
            Some("InvalidRequest"),
            "missing field 'actor'"
        ));
    }

    #[test]
    fn url_joins_host_and_method() {
        let client = ApiClient::new("https://bsky.social", None).unwrap();
        assert_eq!(
            client.url("app.bsky.actor.getProfile"),
            "https://bsky.social/xrpc/app.bsky.actor.getProfile"
        );
    }

    #[test]
    fn rejects_oversized_profile_batch() {
        let client = ApiClient::new("https://bsky.social", None).unwrap();
        let dids: Vec<Did> = (0..26).map(|i| format!("did:plc:{i}").into()).collect();
        let result = tokio::runtime::Runtime::new()
            .unwrap()
            .block_on(client.get_profiles(&dids));
        assert!(result.is_err());
    }
}
