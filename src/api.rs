use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::activity::{self, Kind};
use crate::stream::{EmbedOutcome, ProgressEvent, StreamBuffer};

/// A citation returned alongside an answer, pointing at the document chunk
/// that supports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Evidence {
    pub filename: String,
    pub chunk_index: usize,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub from: Sender,
    pub content: String,
    /// Null in stored history for user turns.
    #[serde(default)]
    pub evidence: Option<Vec<Evidence>>,
}

impl ChatMessage {
    pub fn evidence(&self) -> &[Evidence] {
        self.evidence.as_deref().unwrap_or(&[])
    }
}

/// A file picked locally, held in memory until it is submitted for
/// embedding.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// How an embed stream ended when the network itself did not fail.
#[derive(Debug, Clone)]
pub enum EmbedEnd {
    Completed(EmbedOutcome),
    Cancelled,
}

#[derive(Debug, Serialize)]
struct CredentialsRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    user_name: String,
}

#[derive(Debug, Serialize)]
struct AskRequest<'a> {
    question: &'a str,
    embedding: &'a str,
    open_mode: bool,
}

#[derive(Debug, Deserialize)]
struct AskResponse {
    answer: String,
    #[serde(default)]
    evidence: Vec<Evidence>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingListResponse {
    #[serde(default)]
    embeddings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LoadEmbeddingResponse {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LoadChatResponse {
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct DeleteEmbeddingResponse {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PreviewChunksResponse {
    #[serde(default)]
    chunks: Vec<String>,
}

/// Client for the Research-GPT backend. Cheap to clone; the bearer token is
/// attached to every request once set.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Turns a non-2xx response into an error, preferring the server's own
    /// `error`/`detail` message over the bare status code.
    async fn non_success(context: &str, response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("detail"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| status.to_string());
        activity::log_with(Kind::Http, format!("{context}: {status}"));
        anyhow!("{detail}")
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        activity::log_with(Kind::Auth, format!("register {username}"));
        let response = self
            .client
            .post(self.url("register"))
            .json(&CredentialsRequest { username, password })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("register", response).await);
        }
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        activity::log_with(Kind::Auth, format!("login {username}"));
        let response = self
            .client
            .post(self.url("login"))
            .json(&CredentialsRequest { username, password })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("login", response).await);
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    /// Validates the stored token and returns the signed-in username.
    pub async fn test_auth(&self) -> Result<String> {
        let response = self
            .authorized(self.client.get(self.url("test-auth")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("test-auth", response).await);
        }
        let who: WhoAmIResponse = response.json().await?;
        Ok(who.user_name)
    }

    pub async fn ask(
        &self,
        question: &str,
        embedding: &str,
        open_mode: bool,
    ) -> Result<(String, Vec<Evidence>)> {
        activity::log_with(Kind::Http, format!("ask against '{embedding}'"));
        let response = self
            .authorized(self.client.post(self.url("ask")))
            .json(&AskRequest { question, embedding, open_mode })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("ask", response).await);
        }
        let answer: AskResponse = response.json().await?;
        Ok((answer.answer, answer.evidence))
    }

    pub async fn list_embeddings(&self) -> Result<Vec<String>> {
        let response = self
            .authorized(self.client.get(self.url("list-embeddings")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("list-embeddings", response).await);
        }
        let list: EmbeddingListResponse = response.json().await?;
        Ok(list.embeddings)
    }

    /// Loads a named embedding server-side and returns its file names.
    pub async fn load_embedding(&self, name: &str) -> Result<Vec<String>> {
        activity::log_with(Kind::Http, format!("load embedding '{name}'"));
        let response = self
            .authorized(self.client.get(self.url("load-embedding")))
            .query(&[("name", name)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("load-embedding", response).await);
        }
        let loaded: LoadEmbeddingResponse = response.json().await?;
        Ok(loaded.files)
    }

    pub async fn load_chat(&self, name: &str) -> Result<Vec<ChatMessage>> {
        let response = self
            .authorized(self.client.get(self.url("load-chat")))
            .query(&[("name", name)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("load-chat", response).await);
        }
        let chat: LoadChatResponse = response.json().await?;
        Ok(chat.messages)
    }

    pub async fn delete_embedding(&self, name: &str) -> Result<String> {
        activity::log_with(Kind::Http, format!("delete embedding '{name}'"));
        let response = self
            .authorized(self.client.post(self.url("delete-embedding")))
            .query(&[("name", name)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("delete-embedding", response).await);
        }
        let deleted: DeleteEmbeddingResponse = response.json().await?;
        Ok(deleted.message)
    }

    pub async fn preview_file(&self, filename: &str, embedding: &str) -> Result<Vec<u8>> {
        let response = self
            .authorized(self.client.get(self.url("preview-file")))
            .query(&[("filename", filename), ("embeddingName", embedding)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("preview-file", response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn preview_chunks(&self, filename: &str, embedding: &str) -> Result<Vec<String>> {
        let response = self
            .authorized(self.client.get(self.url("preview-chunks")))
            .query(&[("filename", filename), ("embeddingName", embedding)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("preview-chunks", response).await);
        }
        let preview: PreviewChunksResponse = response.json().await?;
        Ok(preview.chunks)
    }

    /// Submits files for embedding and consumes the progress stream.
    ///
    /// Each recognized progress line is handed to `publish`, and its future
    /// awaited, before the next chunk is requested, so observers see every
    /// event in arrival order even when one chunk carries hundreds of lines.
    /// The cancellation token is checked between chunk reads; triggering it
    /// abandons the parse without producing an outcome. A network failure
    /// mid-stream surfaces as `Err`, never as a stale progress value.
    pub async fn embed_files<F, Fut>(
        &self,
        name: &str,
        append: bool,
        files: Vec<LocalFile>,
        cancel: CancellationToken,
        mut publish: F,
    ) -> Result<EmbedEnd>
    where
        F: FnMut(ProgressEvent) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        activity::log_with(
            Kind::Stream,
            format!("embed {} file(s) into '{name}'", files.len()),
        );

        let mut form = multipart::Form::new()
            .text("name", name.to_string())
            .text("append", if append { "True" } else { "False" });
        for file in files {
            form = form.part("files", multipart::Part::bytes(file.bytes).file_name(file.name));
        }

        let response = self
            .authorized(self.client.post(self.url("embed-files")))
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::non_success("embed-files", response).await);
        }

        let mut buffer = StreamBuffer::new();
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    activity::log_with(Kind::Stream, "embed stream cancelled");
                    return Ok(EmbedEnd::Cancelled);
                }
                item = stream.next() => match item {
                    Some(chunk) => {
                        forward_progress(&mut buffer, &chunk?, &mut publish).await;
                        // Yield to allow UI to remain responsive
                        tokio::task::yield_now().await;
                    }
                    None => break,
                }
            }
        }

        let outcome = buffer.finish();
        activity::log_with(Kind::Stream, format!("embed stream done: {}", outcome.message));
        Ok(EmbedEnd::Completed(outcome))
    }
}

/// Feeds one chunk into the parser, then delivers each event it produced
/// through an awaited send. Delivery blocks on the observer, not the parser,
/// so a slow consumer backs up the stream instead of losing events.
async fn forward_progress<F, Fut>(buffer: &mut StreamBuffer, chunk: &[u8], publish: &mut F)
where
    F: FnMut(ProgressEvent) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut pending = Vec::new();
    buffer.push(chunk, &mut |event| pending.push(event));
    for event in pending {
        publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_history_deserializes_with_null_evidence() {
        let raw = r#"{"messages":[
            {"from":"user","content":"what is faiss?","evidence":null},
            {"from":"bot","content":"An index.","evidence":[
                {"filename":"paper.pdf","chunk_index":3,"text":"..."}
            ]}
        ]}"#;
        let chat: LoadChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].from, Sender::User);
        assert!(chat.messages[0].evidence().is_empty());
        assert_eq!(chat.messages[1].evidence()[0].chunk_index, 3);
    }

    #[test]
    fn ask_response_defaults_missing_evidence() {
        // Open mode answers carry no citations.
        let raw = r#"{"answer":"Paris."}"#;
        let parsed: AskResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.answer, "Paris.");
        assert!(parsed.evidence.is_empty());
    }

    #[tokio::test]
    async fn burst_chunk_delivers_every_event_in_order() {
        // A single TCP chunk can carry the progress lines of a whole large
        // document. Capacity 1 forces the publisher to wait on the consumer
        // for every event; nothing may be dropped.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<ProgressEvent>(1);
        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                seen.push(event);
            }
            seen
        });

        let mut chunk = String::new();
        for i in 1..=340 {
            chunk.push_str(&format!("PROGRESS: Embedding chunk {i}/340\n"));
        }

        let mut buffer = StreamBuffer::new();
        forward_progress(&mut buffer, chunk.as_bytes(), &mut |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event).await;
            }
        })
        .await;
        drop(tx);

        let seen = consumer.await.unwrap();
        assert_eq!(seen.len(), 340);
        for (i, event) in seen.iter().enumerate() {
            assert_eq!(event.completed, i as u64 + 1);
            assert_eq!(event.total, 340);
        }
    }
}
