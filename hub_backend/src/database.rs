use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::agent::AgentState;
use crate::error::{MemoryError, StoreError};
use crate::store::{
    AgentStateStore, ChatHistoryStore, ChatRole, ChatTurn, EntitySnapshot, EntityStore,
    GoalRecord, PersonRecord, Priority, TaskRecord, TransactionKind,
};

const SNAPSHOT_TASK_LIMIT: usize = 10;
const SNAPSHOT_PEOPLE_LIMIT: usize = 10;
const SNAPSHOT_GOAL_LIMIT: usize = 5;

/// Attributes whose new values are appended to the stored ones on update.
const APPENDABLE_ATTRIBUTES: &[&str] = &["strengths", "weaknesses"];

pub struct HubDatabase {
    conn: Mutex<Connection>,
}

impl HubDatabase {
    /// Helper to lock the connection
    fn lock_conn<E>(&self, poisoned: fn(String) -> E) -> Result<MutexGuard<'_, Connection>, E> {
        self.conn
            .lock()
            .map_err(|e| poisoned(format!("Database lock poisoned: {}", e)))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chat_history_user ON chat_history(user_id, id)",
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS agent_state (
                user_id TEXT PRIMARY KEY,
                persona TEXT NOT NULL,
                active_goals TEXT NOT NULL DEFAULT '[]',
                recent_actions TEXT NOT NULL DEFAULT '[]',
                memory_summary TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                deadline TEXT,
                priority TEXT NOT NULL DEFAULT 'medium',
                done INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_open ON tasks(user_id, done)",
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS people (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                full_name TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS knowledge (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS finance_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount REAL NOT NULL,
                category TEXT NOT NULL,
                date TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_finance_transactions_user_date ON finance_transactions(user_id, date)",
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS finance_goals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                target_amount REAL NOT NULL,
                current_amount REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        Ok(())
    }

    fn load_person(
        conn: &Connection,
        user_id: &str,
        person_id: i64,
    ) -> Result<Option<PersonRecord>, StoreError> {
        let row = conn
            .query_row(
                "SELECT id, full_name, data FROM people WHERE user_id = ?1 AND id = ?2",
                params![user_id, person_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;

        match row {
            Some((id, full_name, data)) => Ok(Some(PersonRecord {
                id,
                full_name,
                attributes: serde_json::from_str(&data)?,
            })),
            None => Ok(None),
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok())
}

fn chat_turn_from_row(row: &Row<'_>) -> rusqlite::Result<ChatTurn> {
    let role: String = row.get(1)?;
    let created_at: String = row.get(3)?;
    Ok(ChatTurn {
        id: row.get(0)?,
        role: ChatRole::from_db(&role),
        content: row.get(2)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let priority: String = row.get(3)?;
    let done: i64 = row.get(4)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        deadline: parse_date(row.get(2)?),
        priority: Priority::from_db(&priority),
        done: done != 0,
    })
}

impl ChatHistoryStore for HubDatabase {
    fn append(&self, user_id: &str, role: ChatRole, content: &str) -> Result<i64, MemoryError> {
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO chat_history (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, role.as_str(), content, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ChatTurn>, MemoryError> {
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, role, content, created_at FROM chat_history
             WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut turns = stmt
            .query_map(params![user_id, limit as i64], chat_turn_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }

    fn count(&self, user_id: &str) -> Result<usize, MemoryError> {
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chat_history WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn oldest(&self, user_id: &str, limit: usize) -> Result<Vec<ChatTurn>, MemoryError> {
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, role, content, created_at FROM chat_history
             WHERE user_id = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let turns = stmt
            .query_map(params![user_id, limit as i64], chat_turn_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(turns)
    }

    fn delete_by_ids(&self, user_id: &str, ids: &[i64]) -> Result<usize, MemoryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM chat_history WHERE user_id = ?1 AND id = ?2")?;
            for id in ids {
                deleted += stmt.execute(params![user_id, id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    fn delete_all(&self, user_id: &str) -> Result<usize, MemoryError> {
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let deleted = conn.execute(
            "DELETE FROM chat_history WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(deleted)
    }

    fn assistant_turns_containing(
        &self,
        user_id: &str,
        needle: &str,
    ) -> Result<Vec<i64>, MemoryError> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        // SQLite LOWER/LIKE only fold ASCII, so Cyrillic matching happens here.
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, content FROM chat_history WHERE user_id = ?1 AND role = ?2 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id, ChatRole::Assistant.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter(|(_, content)| content.to_lowercase().contains(&needle))
            .map(|(id, _)| id)
            .collect())
    }

    fn trim_to(&self, user_id: &str, keep: usize) -> Result<usize, MemoryError> {
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let deleted = conn.execute(
            "DELETE FROM chat_history WHERE user_id = ?1 AND id NOT IN (
                SELECT id FROM chat_history WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
            )",
            params![user_id, keep as i64],
        )?;
        Ok(deleted)
    }

    fn replace_with_summary(
        &self,
        user_id: &str,
        ids: &[i64],
        content: &str,
    ) -> Result<i64, MemoryError> {
        let mut conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM chat_history WHERE user_id = ?1 AND id = ?2")?;
            for id in ids {
                stmt.execute(params![user_id, id])?;
            }
        }

        // Reusing the smallest freed id keeps the summary ahead of the remaining turns.
        let now = Utc::now().to_rfc3339();
        let summary_id = match ids.iter().min() {
            Some(&slot) => {
                tx.execute(
                    "INSERT INTO chat_history (id, user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![slot, user_id, ChatRole::System.as_str(), content, now],
                )?;
                slot
            }
            None => {
                tx.execute(
                    "INSERT INTO chat_history (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, ChatRole::System.as_str(), content, now],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.commit()?;
        Ok(summary_id)
    }
}

impl AgentStateStore for HubDatabase {
    fn load_agent_state(&self, user_id: &str) -> Result<Option<AgentState>, MemoryError> {
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        let row = conn
            .query_row(
                "SELECT persona, active_goals, recent_actions, memory_summary FROM agent_state WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((persona, goals, actions, memory_summary)) => Ok(Some(AgentState {
                user_id: user_id.to_string(),
                persona,
                active_goals: serde_json::from_str(&goals)?,
                recent_actions: serde_json::from_str(&actions)?,
                memory_summary,
            })),
            None => Ok(None),
        }
    }

    fn save_agent_state(&self, state: &AgentState) -> Result<(), MemoryError> {
        let goals = serde_json::to_string(&state.active_goals)?;
        let actions = serde_json::to_string(&state.recent_actions)?;
        let conn = self.lock_conn(MemoryError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO agent_state (user_id, persona, active_goals, recent_actions, memory_summary, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                persona = excluded.persona,
                active_goals = excluded.active_goals,
                recent_actions = excluded.recent_actions,
                memory_summary = excluded.memory_summary,
                updated_at = excluded.updated_at",
            params![
                state.user_id,
                state.persona,
                goals,
                actions,
                state.memory_summary,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

impl EntityStore for HubDatabase {
    fn create_task(
        &self,
        user_id: &str,
        title: &str,
        deadline: Option<NaiveDate>,
        priority: Priority,
    ) -> Result<i64, StoreError> {
        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO tasks (user_id, title, deadline, priority, done, created_at) VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                user_id,
                title,
                deadline.map(|d| d.format("%Y-%m-%d").to_string()),
                priority.as_str(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_open_task_matching(
        &self,
        user_id: &str,
        fragment: &str,
    ) -> Result<Option<TaskRecord>, StoreError> {
        let fragment = fragment.trim().to_lowercase();
        if fragment.is_empty() {
            return Ok(None);
        }

        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, title, deadline, priority, done FROM tasks
             WHERE user_id = ?1 AND done = 0 ORDER BY id ASC",
        )?;
        let tasks = stmt
            .query_map(params![user_id], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Prefer titles containing the fragment; fall back to a fragment that
        // quotes the whole title plus extra words.
        let by_title = tasks
            .iter()
            .find(|task| task.title.to_lowercase().contains(&fragment))
            .cloned();
        Ok(by_title.or_else(|| {
            tasks.into_iter().find(|task| {
                let title = task.title.trim().to_lowercase();
                !title.is_empty() && fragment.contains(&title)
            })
        }))
    }

    fn mark_task_done(&self, user_id: &str, task_id: i64) -> Result<(), StoreError> {
        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        let updated = conn.execute(
            "UPDATE tasks SET done = 1, completed_at = ?3 WHERE user_id = ?1 AND id = ?2",
            params![user_id, task_id, Utc::now().to_rfc3339()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("task {}", task_id)));
        }
        Ok(())
    }

    fn create_person(
        &self,
        user_id: &str,
        full_name: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<i64, StoreError> {
        let data = serde_json::to_string(attributes)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO people (user_id, full_name, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![user_id, full_name, data, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_people_by_name_substring(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<PersonRecord>, StoreError> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, full_name, data FROM people WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut people = Vec::new();
        for (id, full_name, data) in rows {
            if full_name.to_lowercase().contains(&query) {
                people.push(PersonRecord {
                    id,
                    full_name,
                    attributes: serde_json::from_str(&data)?,
                });
            }
        }
        Ok(people)
    }

    fn update_person_attributes(
        &self,
        user_id: &str,
        person_id: i64,
        attributes: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        let mut person = Self::load_person(&conn, user_id, person_id)?
            .ok_or_else(|| StoreError::NotFound(format!("person {}", person_id)))?;

        for (key, value) in attributes {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let merged = match person.attributes.get(key) {
                Some(existing)
                    if APPENDABLE_ATTRIBUTES.contains(&key.as_str())
                        && !existing.trim().is_empty() =>
                {
                    format!("{}, {}", existing.trim(), value)
                }
                _ => value.to_string(),
            };
            person.attributes.insert(key.clone(), merged);
        }

        conn.execute(
            "UPDATE people SET data = ?3, updated_at = ?4 WHERE user_id = ?1 AND id = ?2",
            params![
                user_id,
                person_id,
                serde_json::to_string(&person.attributes)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn create_knowledge_item(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO knowledge (user_id, title, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, title, content, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn create_transaction(
        &self,
        user_id: &str,
        kind: TransactionKind,
        amount: f64,
        category: &str,
        date: NaiveDate,
    ) -> Result<i64, StoreError> {
        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO finance_transactions (user_id, kind, amount, category, date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                kind.as_str(),
                amount,
                category,
                date.format("%Y-%m-%d").to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn create_goal(
        &self,
        user_id: &str,
        title: &str,
        target_amount: f64,
    ) -> Result<i64, StoreError> {
        let conn = self.lock_conn(StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO finance_goals (user_id, title, target_amount, current_amount, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![user_id, title, target_amount, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn snapshot(&self, user_id: &str, today: NaiveDate) -> Result<EntitySnapshot, StoreError> {
        let conn = self.lock_conn(StoreError::LockPoisoned)?;

        let open_tasks = {
            let mut stmt = conn.prepare(
                "SELECT id, title, deadline, priority, done FROM tasks
                 WHERE user_id = ?1 AND done = 0
                 ORDER BY deadline IS NULL, deadline ASC, id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, SNAPSHOT_TASK_LIMIT as i64], task_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let people = {
            let mut stmt = conn.prepare(
                "SELECT id, full_name, data FROM people WHERE user_id = ?1
                 ORDER BY updated_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![user_id, SNAPSHOT_PEOPLE_LIMIT as i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let mut people = Vec::with_capacity(rows.len());
            for (id, full_name, data) in rows {
                people.push(PersonRecord {
                    id,
                    full_name,
                    attributes: serde_json::from_str(&data)?,
                });
            }
            people
        };

        let goals = {
            let mut stmt = conn.prepare(
                "SELECT id, title, target_amount, current_amount FROM finance_goals
                 WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, SNAPSHOT_GOAL_LIMIT as i64], |row| {
                Ok(GoalRecord {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    target_amount: row.get(2)?,
                    current_amount: row.get(3)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let month_start = today.with_day(1).unwrap_or(today);
        let next_month = month_start
            .checked_add_months(Months::new(1))
            .unwrap_or(today);
        let sum_for = |kind: TransactionKind| -> Result<f64, StoreError> {
            let total: f64 = conn.query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM finance_transactions
                 WHERE user_id = ?1 AND kind = ?2 AND date >= ?3 AND date < ?4",
                params![
                    user_id,
                    kind.as_str(),
                    month_start.format("%Y-%m-%d").to_string(),
                    next_month.format("%Y-%m-%d").to_string()
                ],
                |row| row.get(0),
            )?;
            Ok(total)
        };
        let month_income = sum_for(TransactionKind::Income)?;
        let month_expense = sum_for(TransactionKind::Expense)?;

        Ok(EntitySnapshot {
            open_tasks,
            people,
            goals,
            month_income,
            month_expense,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("hub_{}_{}.db", name, uuid::Uuid::new_v4()));
        path
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn chat_history_keeps_insertion_order_per_user() {
        let db = HubDatabase::new(temp_db_path("history_order")).expect("db init");
        for i in 0..5 {
            db.append("alice", ChatRole::User, &format!("msg {}", i))
                .expect("append");
        }
        db.append("bob", ChatRole::User, "other user").expect("append");

        assert_eq!(db.count("alice").expect("count"), 5);
        let recent = db.recent("alice", 2).expect("recent");
        assert_eq!(
            recent.iter().map(|t| t.content.as_str()).collect::<Vec<_>>(),
            vec!["msg 3", "msg 4"]
        );
        let oldest = db.oldest("alice", 2).expect("oldest");
        assert_eq!(oldest[0].content, "msg 0");
        assert_eq!(oldest[1].content, "msg 1");
        assert_eq!(db.count("bob").expect("count"), 1);
    }

    #[test]
    fn trim_keeps_newest_turns() {
        let db = HubDatabase::new(temp_db_path("trim")).expect("db init");
        for i in 0..10 {
            db.append("u", ChatRole::User, &format!("{}", i)).expect("append");
        }
        assert_eq!(db.trim_to("u", 3).expect("trim"), 7);
        let remaining = db.recent("u", 10).expect("recent");
        assert_eq!(
            remaining.iter().map(|t| t.content.as_str()).collect::<Vec<_>>(),
            vec!["7", "8", "9"]
        );
    }

    #[test]
    fn summary_takes_the_place_of_the_compacted_chunk() {
        let db = HubDatabase::new(temp_db_path("summary_slot")).expect("db init");
        for i in 0..6 {
            db.append("u", ChatRole::User, &format!("{}", i)).expect("append");
        }
        let chunk: Vec<i64> = db.oldest("u", 3).expect("oldest").iter().map(|t| t.id).collect();
        let summary_id = db
            .replace_with_summary("u", &chunk, "резюме")
            .expect("replace");

        assert_eq!(summary_id, chunk[0]);
        let turns = db.recent("u", 10).expect("recent");
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, ChatRole::System);
        assert_eq!(turns[0].content, "резюме");
        assert_eq!(turns[1].content, "3");
    }

    #[test]
    fn assistant_search_folds_cyrillic_case() {
        let db = HubDatabase::new(temp_db_path("assistant_search")).expect("db init");
        db.append("u", ChatRole::User, "Иван мой брат").expect("append");
        let hit = db
            .append("u", ChatRole::Assistant, "ИВАН работает в банке")
            .expect("append");
        db.append("u", ChatRole::Assistant, "Погода хорошая").expect("append");

        let ids = db.assistant_turns_containing("u", "иван").expect("search");
        assert_eq!(ids, vec![hit]);
    }

    #[test]
    fn agent_state_upserts() {
        let db = HubDatabase::new(temp_db_path("agent_state")).expect("db init");
        assert!(db.load_agent_state("u").expect("load").is_none());

        let mut state = AgentState::new("u", "Персона");
        state.active_goals.push("Накопить на отпуск".to_string());
        db.save_agent_state(&state).expect("save");

        state.memory_summary = "Любит кофе".to_string();
        db.save_agent_state(&state).expect("save again");

        let loaded = db.load_agent_state("u").expect("load").expect("present");
        assert_eq!(loaded, state);
    }

    #[test]
    fn task_round_trip_and_completion() {
        let db = HubDatabase::new(temp_db_path("tasks")).expect("db init");
        let id = db
            .create_task("u", "Купить молоко", Some(date(2026, 10, 18)), Priority::High)
            .expect("create");

        let found = db
            .find_open_task_matching("u", "молоко")
            .expect("find")
            .expect("present");
        assert_eq!(found.id, id);
        assert_eq!(found.priority, Priority::High);
        assert_eq!(found.deadline, Some(date(2026, 10, 18)));

        db.mark_task_done("u", id).expect("done");
        assert!(db.find_open_task_matching("u", "молоко").expect("find").is_none());
        assert!(matches!(
            db.mark_task_done("u", 9999),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn person_update_appends_traits_and_overwrites_relation() {
        let db = HubDatabase::new(temp_db_path("people")).expect("db init");
        let mut attrs = BTreeMap::new();
        attrs.insert("relation".to_string(), "друг".to_string());
        attrs.insert("strengths".to_string(), "добрый".to_string());
        let id = db.create_person("u", "Иван Петров", &attrs).expect("create");

        let mut update = BTreeMap::new();
        update.insert("relation".to_string(), "коллега".to_string());
        update.insert("strengths".to_string(), "пунктуальный".to_string());
        db.update_person_attributes("u", id, &update).expect("update");

        let people = db.find_people_by_name_substring("u", "петров").expect("find");
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].relation(), Some("коллега"));
        assert_eq!(
            people[0].attributes.get("strengths").map(String::as_str),
            Some("добрый, пунктуальный")
        );
        assert!(db
            .find_people_by_name_substring("other", "петров")
            .expect("find")
            .is_empty());
    }

    #[test]
    fn snapshot_sums_only_current_month() {
        let db = HubDatabase::new(temp_db_path("snapshot")).expect("db init");
        let today = date(2026, 10, 18);
        db.create_transaction("u", TransactionKind::Expense, 500.0, "Еда", date(2026, 10, 1))
            .expect("tx");
        db.create_transaction("u", TransactionKind::Expense, 250.5, "Такси", today)
            .expect("tx");
        db.create_transaction("u", TransactionKind::Expense, 999.0, "Старое", date(2026, 9, 30))
            .expect("tx");
        db.create_transaction("u", TransactionKind::Income, 100000.0, "Зарплата", today)
            .expect("tx");
        db.create_goal("u", "Отпуск", 150000.0).expect("goal");
        db.create_task("u", "Без срока", None, Priority::Medium).expect("task");
        db.create_task("u", "Со сроком", Some(today), Priority::Medium)
            .expect("task");

        let snapshot = db.snapshot("u", today).expect("snapshot");
        assert!((snapshot.month_expense - 750.5).abs() < f64::EPSILON);
        assert!((snapshot.month_income - 100000.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.goals.len(), 1);
        assert_eq!(snapshot.open_tasks[0].title, "Со сроком");
        assert_eq!(snapshot.open_tasks[1].title, "Без срока");
    }
}
