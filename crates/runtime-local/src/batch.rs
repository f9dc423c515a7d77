use runtime::fetch::{FetchError, FetchResult, SubgraphResponse};
use runtime::secure_json;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::client::post_json;

/// Coalesces concurrent calls to one subgraph into a single array-body
/// request. Whatever is queued when the drain task wakes up goes out
/// together; responses are demultiplexed by array position.
#[derive(Clone)]
pub(crate) struct Batcher {
    tx: mpsc::UnboundedSender<BatchItem>,
}

struct BatchItem {
    body: Value,
    headers: http::HeaderMap,
    reply: oneshot::Sender<FetchResult<SubgraphResponse>>,
}

impl Batcher {
    pub(crate) fn spawn(client: reqwest::Client, urls: Vec<Url>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(client, urls, rx));
        Batcher { tx }
    }

    pub(crate) async fn submit(
        &self,
        body: Value,
        headers: http::HeaderMap,
    ) -> FetchResult<SubgraphResponse> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(BatchItem {
                body,
                headers,
                reply,
            })
            .map_err(|_| FetchError::Closed)?;
        response.await.map_err(|_| FetchError::Closed)?
    }
}

async fn drain(
    client: reqwest::Client,
    urls: Vec<Url>,
    mut rx: mpsc::UnboundedReceiver<BatchItem>,
) {
    while let Some(first) = rx.recv().await {
        let mut items = vec![first];
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }

        if items.len() == 1 {
            let item = items.pop().expect("just pushed");
            let result = execute_single(&client, &urls, &item).await;
            let _ = item.reply.send(result);
        } else {
            execute_batch(&client, &urls, items).await;
        }
    }
}

async fn execute_single(
    client: &reqwest::Client,
    urls: &[Url],
    item: &BatchItem,
) -> FetchResult<SubgraphResponse> {
    let (status, bytes) = post_json(client, urls, &item.headers, &item.body).await?;
    SubgraphResponse::from_bytes(Some(status), &bytes)
}

async fn execute_batch(client: &reqwest::Client, urls: &[Url], items: Vec<BatchItem>) {
    // The batch rides on the first caller's outbound headers; all queued
    // calls belong to the same subgraph and forwarding rules.
    let headers = items[0].headers.clone();
    let bodies = Value::Array(items.iter().map(|item| item.body.clone()).collect());

    let result = post_json(client, urls, &headers, &bodies).await;

    let (status, bytes) = match result {
        Ok(response) => response,
        Err(err) => {
            for item in items {
                let _ = item.reply.send(Err(err.clone()));
            }
            return;
        }
    };

    let parsed = secure_json::parse(&bytes);
    let responses = match parsed {
        Ok(Value::Array(responses)) if responses.len() == items.len() => responses,
        Ok(_) => {
            let err = FetchError::InvalidJson(
                "batched request did not return a matching response array".to_owned(),
            );
            for item in items {
                let _ = item.reply.send(Err(err.clone()));
            }
            return;
        }
        Err(err) => {
            for item in items {
                let _ = item.reply.send(Err(err.clone()));
            }
            return;
        }
    };

    for (item, response) in items.into_iter().zip(responses) {
        let _ = item
            .reply
            .send(Ok(SubgraphResponse::from_value(Some(status), response)));
    }
}
