use std::sync::Arc;
use thiserror::Error;

use super::action::{Action, Priority, TransactionKind};
use crate::error::StoreError;
use crate::store::EntityStore;

const STORE_FAILURE_TEXT: &str = "❌ Не получилось сохранить изменения. Попробуй ещё раз чуть позже.";
const MAX_LISTED_CANDIDATES: usize = 5;

/// Rejections shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("❌ Не указано название задачи")]
    EmptyTaskTitle,

    #[error("❌ Не указано, какую задачу отметить выполненной")]
    EmptyTaskFragment,

    #[error("❌ Сумма должна быть больше нуля")]
    NonPositiveAmount,

    #[error("❌ Не указано имя контакта")]
    EmptyPersonName,

    #[error("❌ Не указано, какой контакт обновить")]
    EmptyPersonQuery,

    #[error("❌ Не указано, что изменить в контакте")]
    NothingToUpdate,

    #[error("❌ Не указано название цели")]
    EmptyGoalTitle,

    #[error("❌ Целевая сумма должна быть больше нуля")]
    NonPositiveTarget,

    #[error("❌ Заметка пустая")]
    EmptyKnowledge,
}

/// Outcome of one action: the reply text and whether user data changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub text: String,
    pub mutated: bool,
}

impl Execution {
    fn done(text: String) -> Self {
        Self {
            text,
            mutated: true,
        }
    }

    fn reply(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mutated: false,
        }
    }
}

impl From<ValidationError> for Execution {
    fn from(error: ValidationError) -> Self {
        Execution::reply(error.to_string())
    }
}

pub fn validate(action: &Action) -> Result<(), ValidationError> {
    match action {
        Action::CreateTask { title, .. } if title.trim().is_empty() => {
            Err(ValidationError::EmptyTaskTitle)
        }
        Action::CompleteTask { title_fragment } if title_fragment.trim().is_empty() => {
            Err(ValidationError::EmptyTaskFragment)
        }
        Action::CreatePerson { full_name, .. } if full_name.trim().is_empty() => {
            Err(ValidationError::EmptyPersonName)
        }
        Action::UpdatePerson { name_query, fields } => {
            if name_query.trim().is_empty() {
                Err(ValidationError::EmptyPersonQuery)
            } else if fields.to_attributes().is_empty() {
                Err(ValidationError::NothingToUpdate)
            } else {
                Ok(())
            }
        }
        Action::AddTransaction { amount, .. } if !(amount.is_finite() && *amount > 0.0) => {
            Err(ValidationError::NonPositiveAmount)
        }
        Action::AddGoal { title, .. } if title.trim().is_empty() => {
            Err(ValidationError::EmptyGoalTitle)
        }
        Action::AddGoal { target_amount, .. }
            if !(target_amount.is_finite() && *target_amount > 0.0) =>
        {
            Err(ValidationError::NonPositiveTarget)
        }
        Action::CreateKnowledge { content, .. } if content.trim().is_empty() => {
            Err(ValidationError::EmptyKnowledge)
        }
        _ => Ok(()),
    }
}

/// Russian-style money formatting: "1 250,5 ₽".
pub fn format_amount(amount: f64) -> String {
    let rounded = (amount * 100.0).round() / 100.0;
    let whole = rounded.trunc() as i64;
    let cents = ((rounded - whole as f64) * 100.0).round() as i64;

    let digits = whole.to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }

    if cents == 0 {
        format!("{} ₽", grouped)
    } else {
        let fraction = format!("{:02}", cents);
        format!("{},{} ₽", grouped, fraction.trim_end_matches('0'))
    }
}

pub struct ActionExecutor {
    store: Arc<dyn EntityStore>,
}

impl ActionExecutor {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Validate and apply `action` for `user_id`. Never fails: store errors are
    /// logged and turned into a fixed apology.
    pub fn execute(&self, user_id: &str, action: &Action) -> Execution {
        if let Err(rejected) = validate(action) {
            tracing::debug!("Rejected {}: {}", action.kind(), rejected);
            return rejected.into();
        }

        match self.apply(user_id, action) {
            Ok(execution) => execution,
            Err(e) => {
                tracing::error!("Failed to execute {} for {}: {}", action.kind(), user_id, e);
                Execution::reply(STORE_FAILURE_TEXT)
            }
        }
    }

    fn apply(&self, user_id: &str, action: &Action) -> Result<Execution, StoreError> {
        let execution = match action {
            Action::CreateTask {
                title,
                deadline,
                priority,
            } => {
                let title = title.trim();
                self.store.create_task(user_id, title, *deadline, *priority)?;
                let mut text = format!("✅ Задача создана: «{}»", title);
                if let Some(deadline) = deadline {
                    text.push_str(&format!("\n📅 Срок: {}", deadline.format("%d.%m.%Y")));
                }
                if *priority == Priority::High {
                    text.push_str("\n🔥 Приоритет: высокий");
                }
                Execution::done(text)
            }
            Action::CompleteTask { title_fragment } => {
                let fragment = title_fragment.trim();
                match self.store.find_open_task_matching(user_id, fragment)? {
                    Some(task) => {
                        self.store.mark_task_done(user_id, task.id)?;
                        Execution::done(format!("✅ Задача выполнена: «{}»", task.title))
                    }
                    None => Execution::reply(format!("❌ Задача «{}» не найдена", fragment)),
                }
            }
            Action::CreatePerson { full_name, fields } => {
                let full_name = full_name.trim();
                let attributes = fields.to_attributes();
                self.store.create_person(user_id, full_name, &attributes)?;
                let mut text = format!("✅ Контакт создан: {}", full_name);
                if let Some(relation) = attributes.get("relation") {
                    text.push_str(&format!(" ({})", relation));
                }
                Execution::done(text)
            }
            Action::UpdatePerson { name_query, fields } => {
                let query = name_query.trim();
                let candidates = self.store.find_people_by_name_substring(user_id, query)?;
                match candidates.as_slice() {
                    [] => Execution::reply(format!("❌ Контакт «{}» не найден", query)),
                    [person] => {
                        self.store
                            .update_person_attributes(user_id, person.id, &fields.to_attributes())?;
                        Execution::done(format!("✅ Контакт обновлён: {}", person.full_name))
                    }
                    several => {
                        let names: Vec<&str> = several
                            .iter()
                            .take(MAX_LISTED_CANDIDATES)
                            .map(|p| p.full_name.as_str())
                            .collect();
                        Execution::reply(format!(
                            "❌ Нашлось несколько контактов: {}. Уточни имя.",
                            names.join(", ")
                        ))
                    }
                }
            }
            Action::AddTransaction {
                kind,
                amount,
                category,
                date,
            } => {
                self.store
                    .create_transaction(user_id, *kind, *amount, category, *date)?;
                let label = match kind {
                    TransactionKind::Income => "Доход",
                    TransactionKind::Expense => "Расход",
                };
                Execution::done(format!(
                    "✅ {} записан: {} — {} ({})",
                    label,
                    format_amount(*amount),
                    category,
                    date.format("%d.%m.%Y")
                ))
            }
            Action::AddGoal {
                title,
                target_amount,
            } => {
                let title = title.trim();
                self.store.create_goal(user_id, title, *target_amount)?;
                Execution::done(format!(
                    "✅ Цель добавлена: «{}», нужно накопить {}",
                    title,
                    format_amount(*target_amount)
                ))
            }
            Action::CreateKnowledge { title, content } => {
                self.store.create_knowledge_item(user_id, title, content.trim())?;
                Execution::done(format!("✅ Сохранено в базу знаний: «{}»", title))
            }
            Action::AskClarification { proposed_title } => Execution::reply(format!(
                "🤔 Похоже, это пока только мысль. Создать задачу «{}»? Напиши «создай задачу {}», если да.",
                proposed_title,
                proposed_title.to_lowercase()
            )),
            Action::AskSplit => Execution::reply(
                "✂️ Похоже, здесь несколько дел сразу. Пришли их по одному, чтобы я ничего не перепутал.",
            ),
            Action::None => Execution::reply(""),
        };
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::HubDatabase;
    use crate::interpreter::action::PersonFields;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn executor() -> (ActionExecutor, Arc<HubDatabase>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Arc::new(HubDatabase::new(dir.path().join("hub.db")).expect("open db"));
        (ActionExecutor::new(db.clone()), db, dir)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 14).expect("valid date")
    }

    #[test]
    fn create_then_complete_task() {
        let (executor, db, _dir) = executor();
        let created = executor.execute(
            "u1",
            &Action::CreateTask {
                title: "Купить молоко".to_string(),
                deadline: Some(today()),
                priority: Priority::Medium,
            },
        );
        assert!(created.mutated);
        assert!(created.text.starts_with("✅ Задача создана: «Купить молоко»"));
        assert!(created.text.contains("14.10.2026"));

        let completed = executor.execute(
            "u1",
            &Action::CompleteTask {
                title_fragment: "купить МОЛОКО".to_string(),
            },
        );
        assert_eq!(
            completed,
            Execution {
                text: "✅ Задача выполнена: «Купить молоко»".to_string(),
                mutated: true,
            }
        );
        assert!(db.snapshot("u1", today()).expect("snapshot").open_tasks.is_empty());

        let again = executor.execute(
            "u1",
            &Action::CompleteTask {
                title_fragment: "купить молоко".to_string(),
            },
        );
        assert!(!again.mutated);
        assert_eq!(again.text, "❌ Задача «купить молоко» не найдена");
    }

    #[test]
    fn invalid_actions_are_refused_without_writes() {
        let (executor, db, _dir) = executor();
        let refused = executor.execute(
            "u1",
            &Action::AddTransaction {
                kind: TransactionKind::Expense,
                amount: 0.0,
                category: "Кофе".to_string(),
                date: today(),
            },
        );
        assert_eq!(refused.text, ValidationError::NonPositiveAmount.to_string());
        assert!(!refused.mutated);

        let refused = executor.execute(
            "u1",
            &Action::AddGoal {
                title: "Отпуск".to_string(),
                target_amount: -1.0,
            },
        );
        assert_eq!(refused.text, "❌ Целевая сумма должна быть больше нуля");

        let refused = executor.execute(
            "u1",
            &Action::CreateTask {
                title: "  ".to_string(),
                deadline: None,
                priority: Priority::Medium,
            },
        );
        assert_eq!(refused.text, "❌ Не указано название задачи");

        let snapshot = db.snapshot("u1", today()).expect("snapshot");
        assert_eq!(snapshot.month_expense, 0.0);
        assert!(snapshot.goals.is_empty());
        assert!(snapshot.open_tasks.is_empty());
    }

    #[test]
    fn ambiguous_person_update_lists_candidates() {
        let (executor, db, _dir) = executor();
        for name in ["Иван Петров", "Иван Сидоров"] {
            db.create_person("u1", name, &BTreeMap::new()).expect("create person");
        }
        let fields = PersonFields {
            workplace: Some("Яндекс".to_string()),
            ..PersonFields::default()
        };

        let ambiguous = executor.execute(
            "u1",
            &Action::UpdatePerson {
                name_query: "иван".to_string(),
                fields: fields.clone(),
            },
        );
        assert!(!ambiguous.mutated);
        assert!(ambiguous.text.starts_with("❌ Нашлось несколько контактов:"));
        assert!(ambiguous.text.contains("Иван Петров"));
        assert!(ambiguous.text.contains("Иван Сидоров"));

        let missing = executor.execute(
            "u1",
            &Action::UpdatePerson {
                name_query: "Смирнова".to_string(),
                fields: fields.clone(),
            },
        );
        assert_eq!(missing.text, "❌ Контакт «Смирнова» не найден");

        let updated = executor.execute(
            "u1",
            &Action::UpdatePerson {
                name_query: "Петров".to_string(),
                fields,
            },
        );
        assert!(updated.mutated);
        let people = db.find_people_by_name_substring("u1", "Петров").expect("search");
        assert_eq!(people[0].attributes.get("workplace").map(String::as_str), Some("Яндекс"));
    }

    #[test]
    fn questions_back_do_not_mutate() {
        let (executor, _db, _dir) = executor();
        assert!(!executor.execute("u1", &Action::AskSplit).mutated);
        let clarification = executor.execute(
            "u1",
            &Action::AskClarification {
                proposed_title: "Подумать об отпуске".to_string(),
            },
        );
        assert!(!clarification.mutated);
        assert!(clarification.text.contains("«Подумать об отпуске»"));
    }

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(150000.0), "150 000 ₽");
        assert_eq!(format_amount(1250.5), "1 250,5 ₽");
        assert_eq!(format_amount(99.99), "99,99 ₽");
    }
}
