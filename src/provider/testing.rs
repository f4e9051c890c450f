use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{error::Error, helpers::formatter};

use super::SourceClient;

#[derive(Debug, Clone)]
pub enum Reply {
    Data(Value),
    IndexingLag,
    MissingEntity,
    Upstream,
}

/// Canned upstream. A query gets the reply queued under the first needle it
/// contains; the last reply of a queue repeats.
#[derive(Debug, Default)]
pub struct FakeSource {
    replies: Mutex<Vec<(String, VecDeque<Reply>)>>,
    sent: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, data: Value) -> Self {
        self.reply(needle, Reply::Data(data))
    }

    pub fn reply(self, needle: &str, reply: Reply) -> Self {
        {
            let mut replies = self.replies.lock().unwrap();
            match replies.iter_mut().find(|(n, _)| n == needle) {
                Some((_, queue)) => queue.push_back(reply),
                None => {
                    replies.push((needle.to_owned(), VecDeque::from([reply])))
                },
            }
        }
        self
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_matching(&self, needle: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|query| query.contains(needle))
            .collect()
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn query(
        &self,
        query: &str,
        params: &[(&str, String)],
    ) -> Result<Value, Error> {
        let query = formatter(query.to_owned(), params);
        self.sent.lock().unwrap().push(query.clone());

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            replies
                .iter_mut()
                .find(|(needle, _)| query.contains(needle.as_str()))
                .and_then(|(_, queue)| {
                    if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    }
                })
        };

        match reply {
            Some(Reply::Data(data)) => Ok(data),
            Some(Reply::IndexingLag) => {
                Err(Error::IndexingLag(String::from("only indexed up to")))
            },
            Some(Reply::MissingEntity) => Err(Error::MissingEntity(
                String::from("Null value resolved for non-null field `user`"),
            )),
            Some(Reply::Upstream) | None => {
                Err(Error::UpstreamError(format!("no reply for {}", query)))
            },
        }
    }
}
