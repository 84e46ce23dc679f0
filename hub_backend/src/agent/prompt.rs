use chrono::NaiveDate;

use crate::interpreter::executor::format_amount;
use crate::store::{EntitySnapshot, Priority};

const ANSWER_RULES: &str = "Правила ответа:
- отвечай по-русски, коротко и по делу;
- опирайся только на данные выше, не выдумывай задачи, людей и суммы;
- если данных не хватает, так и скажи и предложи, что добавить;
- чтобы что-то сохранить, пользователь пишет команду вроде «создай задачу …», \
«расход 500 на такси», «цель: отпуск 100 000» — подскажи формулировку, если он просит сохранить;
- не используй markdown-таблицы.";

/// Structured view of the user's data plus the answer rules.
pub fn data_section(snapshot: &EntitySnapshot, today: NaiveDate) -> String {
    let mut out = format!("Сегодня: {}.\n\n", today.format("%d.%m.%Y"));

    out.push_str("Открытые задачи:\n");
    if snapshot.open_tasks.is_empty() {
        out.push_str("- нет\n");
    }
    for task in &snapshot.open_tasks {
        let mut line = format!("- {}", task.title);
        let mut notes = Vec::new();
        if let Some(deadline) = task.deadline {
            let overdue = if deadline < today { ", просрочено" } else { "" };
            notes.push(format!("до {}{}", deadline.format("%d.%m.%Y"), overdue));
        }
        if task.priority == Priority::High {
            notes.push("высокий приоритет".to_string());
        }
        if !notes.is_empty() {
            line.push_str(&format!(" ({})", notes.join(", ")));
        }
        out.push_str(&line);
        out.push('\n');
    }

    out.push_str("\nЛюди:\n");
    if snapshot.people.is_empty() {
        out.push_str("- нет\n");
    }
    for person in &snapshot.people {
        match person.relation() {
            Some(relation) => out.push_str(&format!("- {} — {}\n", person.full_name, relation)),
            None => out.push_str(&format!("- {}\n", person.full_name)),
        }
    }

    out.push_str(&format!(
        "\nФинансы за текущий месяц: доходы {}, расходы {}.\n",
        format_amount(snapshot.month_income),
        format_amount(snapshot.month_expense)
    ));
    if !snapshot.goals.is_empty() {
        out.push_str("Финансовые цели:\n");
        for goal in &snapshot.goals {
            out.push_str(&format!(
                "- {}: {} из {}\n",
                goal.title,
                format_amount(goal.current_amount),
                format_amount(goal.target_amount)
            ));
        }
    }

    out.push('\n');
    out.push_str(ANSWER_RULES);
    out
}
