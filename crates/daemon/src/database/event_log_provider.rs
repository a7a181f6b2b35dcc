use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use common::event_log::{
    ContinuationToken, EventLogError, EventLogProvider, RangeQuery, RecordPage, StoredRecord,
};

use super::Database;

#[async_trait]
impl EventLogProvider for Database {
    type Error = sqlx::Error;

    async fn insert(&self, record: StoredRecord) -> Result<(), EventLogError<Self::Error>> {
        sqlx::query(
            r#"
            INSERT INTO event_log (partition_key, row_key, event_json, destination_json, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(partition_key, row_key) DO UPDATE SET
                event_json = excluded.event_json,
                destination_json = excluded.destination_json,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(&record.partition_key)
        .bind(&record.row_key)
        .bind(&record.event_json)
        .bind(record.destination_json.as_deref())
        .bind(record.recorded_at.to_rfc3339())
        .execute(&**self)
        .await?;

        Ok(())
    }

    async fn query_range(
        &self,
        query: &RangeQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<RecordPage, EventLogError<Self::Error>> {
        if let Some(token) = continuation {
            if token.row_key() < query.lower_inclusive.as_str() {
                return Err(EventLogError::InvalidContinuation(
                    token.row_key().to_string(),
                ));
            }
        }
        if query.upper_exclusive <= query.lower_inclusive {
            return Ok(RecordPage::default());
        }

        let page_size = query.page_size.max(1);
        // one extra row tells us whether another page follows
        let limit = page_size as i64 + 1;

        let rows = match continuation {
            Some(token) => {
                sqlx::query(
                    r#"
                    SELECT partition_key, row_key, event_json, destination_json, recorded_at
                    FROM event_log
                    WHERE partition_key = ?1 AND row_key > ?2 AND row_key < ?3
                    ORDER BY row_key ASC
                    LIMIT ?4
                    "#,
                )
                .bind(&query.partition_key)
                .bind(token.row_key())
                .bind(&query.upper_exclusive)
                .bind(limit)
                .fetch_all(&**self)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT partition_key, row_key, event_json, destination_json, recorded_at
                    FROM event_log
                    WHERE partition_key = ?1 AND row_key >= ?2 AND row_key < ?3
                    ORDER BY row_key ASC
                    LIMIT ?4
                    "#,
                )
                .bind(&query.partition_key)
                .bind(&query.lower_inclusive)
                .bind(&query.upper_exclusive)
                .bind(limit)
                .fetch_all(&**self)
                .await?
            }
        };

        let has_more = rows.len() > page_size;
        let records = rows
            .iter()
            .take(page_size)
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let continuation = match (has_more, records.last()) {
            (true, Some(last)) => Some(ContinuationToken::after(last.row_key.clone())),
            _ => None,
        };

        Ok(RecordPage {
            records,
            continuation,
        })
    }

    async fn count(&self, partition_key: &str) -> Result<u64, EventLogError<Self::Error>> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM event_log WHERE partition_key = ?
            "#,
        )
        .bind(partition_key)
        .fetch_one(&**self)
        .await?;

        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredRecord, sqlx::Error> {
    let recorded_at: String = row.try_get("recorded_at")?;
    let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc);

    Ok(StoredRecord {
        partition_key: row.try_get("partition_key")?,
        row_key: row.try_get("row_key")?,
        event_json: row.try_get("event_json")?,
        destination_json: row.try_get("destination_json")?,
        recorded_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::event_log::{EventLog, LogRecord};
    use common::partition::tick_string;
    use common::testkit::events;
    use chrono::{Duration, TimeZone};

    fn stored(partition_key: &str, row_key: &str) -> StoredRecord {
        StoredRecord {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
            event_json: "{}".to_string(),
            destination_json: None,
            recorded_at: Utc.with_ymd_and_hms(2023, 3, 15, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_overwrites_same_key() {
        let db = Database::in_memory().await.unwrap();

        db.insert(stored("2023_11", "1_a")).await.unwrap();
        let mut updated = stored("2023_11", "1_a");
        updated.destination_json = Some("{\"x\":1}".to_string());
        db.insert(updated.clone()).await.unwrap();

        assert_eq!(db.count("2023_11").await.unwrap(), 1);
        assert_eq!(db.count("2023_12").await.unwrap(), 0);

        let query = RangeQuery {
            partition_key: "2023_11".to_string(),
            lower_inclusive: "0".to_string(),
            upper_exclusive: "2".to_string(),
            page_size: 10,
        };
        let page = db.query_range(&query, None).await.unwrap();
        assert_eq!(page.records, vec![updated]);
        assert!(page.continuation.is_none());
    }

    #[tokio::test]
    async fn test_range_bounds_and_paging() {
        let db = Database::in_memory().await.unwrap();
        for row_key in ["09_x", "10_a", "10_b", "11_a", "12_a", "20_a"] {
            db.insert(stored("p", row_key)).await.unwrap();
        }
        db.insert(stored("other", "10_z")).await.unwrap();

        let query = RangeQuery {
            partition_key: "p".to_string(),
            lower_inclusive: "10".to_string(),
            upper_exclusive: "20".to_string(),
            page_size: 2,
        };

        let first = db.query_range(&query, None).await.unwrap();
        let keys: Vec<_> = first.records.iter().map(|r| r.row_key.as_str()).collect();
        assert_eq!(keys, vec!["10_a", "10_b"]);
        let token = first.continuation.unwrap();

        let second = db.query_range(&query, Some(&token)).await.unwrap();
        let keys: Vec<_> = second.records.iter().map(|r| r.row_key.as_str()).collect();
        assert_eq!(keys, vec!["11_a", "12_a"]);
        assert!(second.continuation.is_none());
    }

    #[tokio::test]
    async fn test_rejects_token_before_range() {
        let db = Database::in_memory().await.unwrap();
        let query = RangeQuery {
            partition_key: "p".to_string(),
            lower_inclusive: "10".to_string(),
            upper_exclusive: "20".to_string(),
            page_size: 2,
        };
        let token = ContinuationToken::after("05_a");
        assert!(matches!(
            db.query_range(&query, Some(&token)).await,
            Err(EventLogError::InvalidContinuation(_))
        ));
    }

    #[tokio::test]
    async fn test_event_log_scans_a_day_through_sqlite() {
        let db = Database::in_memory().await.unwrap();
        let log = EventLog::with_page_size(db, 2);
        let start = Utc.with_ymd_and_hms(2023, 3, 15, 0, 0, 0).unwrap();

        for i in 0..5 {
            let time = start + Duration::hours(i * 6);
            let event = events::deleted(&format!("d-{}", i), time, "c", "b");
            log.append(&LogRecord::new(event, None).unwrap())
                .await
                .unwrap();
        }

        let entries = log
            .scan(2023, 11, start, start + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries
            .iter()
            .all(|entry| entry.row_key.as_str() >= tick_string(start).as_str()));
    }
}
