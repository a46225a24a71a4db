use futures::future::join_all;
use mongodb::bson::{doc, Document};
use mongodb::options::FindOptions;
use serde::Serialize;
use std::{
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::time::interval;

use super::queue_entry::{process_due_document, EntryOutcome, QueueEntryStatus};
use crate::{constants::*, utils::get_epoch_ts};

#[cfg(test)]
use mockall_double::double;

#[cfg_attr(test, double)]
use crate::database::AppDatabase;

#[cfg_attr(test, double)]
use super::fcm::FcmClient;

/// Counts of the last completed run, published for observability only
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub last_run_ts: u64,
    pub picked: u32,
    pub sent: u32,
    pub failed: u32,
    pub no_tokens: u32,
}

pub async fn dispatch_job(
    db: Arc<AppDatabase>,
    fcm: Arc<FcmClient>,
    stats: Arc<RwLock<RunStats>>,
) {
    tracing::debug!("initializing notification dispatch job");
    // DISPATCH_JOB_INTERVAL is mentioned in seconds
    let mut interval = interval(Duration::from_secs(DISPATCH_JOB_INTERVAL));
    loop {
        interval.tick().await;
        let run = run_batch(&db, &fcm, get_epoch_ts()).await;
        if run.picked > 0 {
            tracing::info!(
                "dispatch run: picked={} sent={} failed={} no_tokens={}",
                run.picked,
                run.sent,
                run.failed,
                run.no_tokens
            );
        }
        if let Ok(mut snapshot) = stats.write() {
            *snapshot = run;
        }
    }
}

/// One pass over the queue: select the due batch, fan out all entries
/// concurrently and wait for every one of them to settle. Entries never
/// affect each other, aggregation is for the stats snapshot only.
pub async fn run_batch(db: &Arc<AppDatabase>, fcm: &Arc<FcmClient>, now: u64) -> RunStats {
    let entries = fetch_due_entries(db, now).await.unwrap_or_else(|e| {
        tracing::debug!("not able to fetch due entries: {:?}", e);
        vec![]
    });
    let mut stats = RunStats {
        last_run_ts: now,
        picked: entries.len() as u32,
        ..Default::default()
    };
    if entries.is_empty() {
        return stats;
    }
    let tasks = entries
        .into_iter()
        .map(|document| process_due_document(db, fcm, document));
    for outcome in join_all(tasks).await {
        match outcome {
            EntryOutcome::Sent => stats.sent += 1,
            EntryOutcome::Failed => stats.failed += 1,
            EntryOutcome::NoTokens => stats.no_tokens += 1,
            EntryOutcome::Skipped => {}
        }
    }
    stats
}

/// Pending entries whose runAt has passed, capped at the batch limit.
/// Overflow beyond the cap is picked up by a later run. Fetched as raw
/// documents, decoding is done per entry during processing.
async fn fetch_due_entries(db: &Arc<AppDatabase>, now: u64) -> anyhow::Result<Vec<Document>> {
    let status = QueueEntryStatus::Pending.to_bson()?;
    let filter = doc! {"status": status, "runAt": {"$lte": now as i64}};
    let options = FindOptions::builder()
        .sort(Some(doc! {"runAt": 1}))
        .limit(Some(DISPATCH_BATCH_LIMIT))
        .build();
    let entries = db
        .find::<Document>(
            DB_NAME,
            COLL_NOTIFICATION_QUEUE,
            Some(filter),
            Some(options),
        )
        .await?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use mongodb::bson::oid::ObjectId;

    use super::super::fcm::{MulticastResponse, SendOutcome};
    use crate::models::user::User;

    use super::*;

    fn new_entry_doc(user_id: u32) -> Document {
        doc! {
            "_id": ObjectId::new(),
            "userId": user_id,
            "taskTitle": "Pay rent",
            "runAt": 100_i64,
            "status": "pending",
        }
    }

    #[tokio::test]
    async fn test_selector_query_shape() {
        let mut db = AppDatabase::default();
        let fcm = Arc::new(FcmClient::default());
        let now = 1_000_000u64;
        db.expect_find::<Document>()
            .withf(move |db_name, coll, filter, options| {
                let filter = filter.as_ref().unwrap();
                let options = options.as_ref().unwrap();
                db_name == DB_NAME
                    && coll == COLL_NOTIFICATION_QUEUE
                    && filter.get_str("status").unwrap() == "pending"
                    && filter
                        .get_document("runAt")
                        .unwrap()
                        .get_i64("$lte")
                        .unwrap()
                        == 1_000_000
                    && options.limit == Some(50)
                    && options.sort == Some(doc! {"runAt": 1})
            })
            .times(1)
            .returning(|_, _, _, _| Ok(vec![]));
        let stats = run_batch(&Arc::new(db), &fcm, now).await;
        assert_eq!(stats.last_run_ts, now);
        assert_eq!(stats.picked, 0);
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.no_tokens, 0);
    }

    #[tokio::test]
    async fn test_selector_error_yields_empty_run() {
        // a failing selector must end the run with no side effects,
        // which the absence of further expectations verifies
        let mut db = AppDatabase::default();
        let fcm = Arc::new(FcmClient::default());
        db.expect_find::<Document>()
            .times(1)
            .returning(|_, _, _, _| {
                Err(mongodb::error::Error::from(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "connection lost",
                )))
            });
        let stats = run_batch(&Arc::new(db), &fcm, 42).await;
        assert_eq!(stats.picked, 0);
    }

    #[tokio::test]
    async fn test_fault_in_one_entry_does_not_affect_siblings() {
        let mut db = AppDatabase::default();
        let mut fcm = FcmClient::default();
        let entries = vec![new_entry_doc(1), new_entry_doc(2)];
        db.expect_find::<Document>()
            .times(1)
            .returning(move |_, _, _, _| Ok(entries.clone()));
        db.expect_find_one::<User>()
            .withf(|_, _, filter, _| filter.as_ref() == Some(&doc! {"id": 1_u32}))
            .times(1)
            .returning(|_, _, _, _| {
                Ok(Some(User {
                    id: 1,
                    fcm_tokens: Some(vec!["ta".to_string()]),
                    ..Default::default()
                }))
            });
        db.expect_find_one::<User>()
            .withf(|_, _, filter, _| filter.as_ref() == Some(&doc! {"id": 2_u32}))
            .times(1)
            .returning(|_, _, _, _| {
                Ok(Some(User {
                    id: 2,
                    fcm_tokens: Some(vec!["tb".to_string()]),
                    ..Default::default()
                }))
            });
        // entry A's gateway call faults, entry B goes through
        fcm.expect_send_multicast()
            .withf(|message| message.tokens == vec!["ta".to_string()])
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("gateway exploded")));
        fcm.expect_send_multicast()
            .withf(|message| message.tokens == vec!["tb".to_string()])
            .times(1)
            .returning(|_| {
                Ok(MulticastResponse {
                    success_count: 1,
                    responses: vec![SendOutcome::success()],
                })
            });
        db.expect_update_one()
            .withf(|_, coll, _, update, _| {
                let set = update.get_document("$set").unwrap();
                coll == COLL_NOTIFICATION_QUEUE
                    && set.get_str("status").unwrap_or_default() == "failed"
                    && set.get_str("lastError").unwrap_or_default() == "gateway exploded"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(1));
        db.expect_update_one()
            .withf(|_, coll, _, update, _| {
                let set = update.get_document("$set").unwrap();
                coll == COLL_NOTIFICATION_QUEUE
                    && set.get_str("status").unwrap_or_default() == "sent"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(1));
        let stats = run_batch(&Arc::new(db), &Arc::new(fcm), 42).await;
        assert_eq!(stats.picked, 2);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.no_tokens, 0);
    }

    #[tokio::test]
    async fn test_wrongly_typed_document_does_not_poison_batch() {
        let mut db = AppDatabase::default();
        let mut fcm = FcmClient::default();
        let bad_oid = ObjectId::new();
        // userId with the wrong bson type must only fail this document
        let bad_doc = doc! {
            "_id": bad_oid,
            "userId": "abc",
            "runAt": 100_i64,
            "status": "pending",
        };
        let entries = vec![bad_doc, new_entry_doc(2)];
        db.expect_find::<Document>()
            .times(1)
            .returning(move |_, _, _, _| Ok(entries.clone()));
        // only the well formed sibling reaches the user lookup
        db.expect_find_one::<User>()
            .withf(|_, _, filter, _| filter.as_ref() == Some(&doc! {"id": 2_u32}))
            .times(1)
            .returning(|_, _, _, _| {
                Ok(Some(User {
                    id: 2,
                    fcm_tokens: Some(vec!["tb".to_string()]),
                    ..Default::default()
                }))
            });
        fcm.expect_send_multicast().times(1).returning(|_| {
            Ok(MulticastResponse {
                success_count: 1,
                responses: vec![SendOutcome::success()],
            })
        });
        // the malformed document is finalized as failed by its raw _id
        db.expect_update_one()
            .withf(move |_, coll, filter, update, _| {
                if coll != COLL_NOTIFICATION_QUEUE {
                    return false;
                }
                let Ok(set) = update.get_document("$set") else {
                    return false;
                };
                filter == &doc! {"_id": bad_oid}
                    && set.get_str("status").unwrap_or_default() == "failed"
                    && !set.get_str("lastError").unwrap_or_default().is_empty()
                    && set.get("sentAt").is_none()
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(1));
        db.expect_update_one()
            .withf(|_, coll, _, update, _| {
                let Ok(set) = update.get_document("$set") else {
                    return false;
                };
                coll == COLL_NOTIFICATION_QUEUE
                    && set.get_str("status").unwrap_or_default() == "sent"
            })
            .times(1)
            .returning(|_, _, _, _, _| Ok(1));
        let stats = run_batch(&Arc::new(db), &Arc::new(fcm), 42).await;
        assert_eq!(stats.picked, 2);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.no_tokens, 0);
    }
}
