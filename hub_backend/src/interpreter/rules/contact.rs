use chrono::NaiveDate;

use super::leading_trigger;
use crate::interpreter::action::{Action, PersonFields};
use crate::interpreter::dates::{find_absolute_date, has_explicit_year, DateMention};
use crate::interpreter::matcher::{Rule, RuleInput, RuleOutcome};
use crate::interpreter::text::{contains_any_word, find_word, title_case, Phrase};

pub const RELATION_WORDS: &[&str] = &[
    "мама", "папа", "мать", "отец", "брат", "сестра", "сын", "дочь", "жена", "муж", "бабушка",
    "дедушка", "дядя", "тетя", "тётя", "племянник", "племянница", "внук", "внучка", "друг",
    "подруга", "приятель", "приятельница", "знакомый", "знакомая", "коллега", "начальник",
    "начальница", "руководитель", "шеф", "подчиненный", "подчинённый", "клиент", "клиентка",
    "сосед", "соседка", "одноклассник", "одноклассница", "однокурсник", "однокурсница",
    "наставник", "ментор", "врач", "тренер", "учитель", "учительница", "девушка", "парень",
    "кум", "кума", "свекровь", "теща", "тёща", "тесть", "крестный", "крёстный", "крестная",
];

/// Fragments that mark a business or work relation inside a longer word.
const RELATION_STEMS: &[&str] = &["партнер", "партнёр", "бизнес", "работ"];

const WEAKNESS_WORDS: &[&str] = &[
    "ленивый", "ленивая", "опаздывает", "непунктуальный", "непунктуальная", "вспыльчивый",
    "вспыльчивая", "забывчивый", "забывчивая", "грубый", "грубая", "упрямый", "упрямая",
    "медлительный", "медлительная", "болтливый", "болтливая", "ненадежный", "ненадёжный",
    "ненадежная", "ненадёжная", "капризный", "капризная", "нервный", "нервная", "конфликтный",
    "конфликтная", "жадный", "жадная", "раздражительный", "раздражительная", "обидчивый",
    "обидчивая", "безответственный", "безответственная",
];

/// Capitalized words that start ordinary sentences rather than names.
const NON_NAME_WORDS: &[&str] = &[
    "привет", "здравствуй", "здравствуйте", "добрый", "доброе", "спасибо", "пока", "слушай",
    "кстати", "вот", "это", "да", "нет", "ок", "хорошо", "ладно", "создай", "добавь", "новый",
    "новая", "контакт", "человек", "человека", "задача", "задачу", "цель", "расход", "доход",
    "заметка", "обнови", "измени", "сегодня", "завтра", "послезавтра", "вчера", "мой", "моя",
    "мои", "наш", "наша", "и", "а", "но", "он", "она", "они", "мы", "вы", "ты", "я", "очень",
];

const VERB_ENDINGS: &[&str] = &["ть", "ти", "чь", "ться", "тся"];

const POSSESSIVES: &[&str] = &["мой", "моя", "моё", "мое", "мои", "наш", "наша", "наши"];

const FILLER_TOKENS: &[&str] = &["и", "а", "он", "она", "очень", "ещё", "еще", "тоже"];

const BIRTH_MARKERS: &[&str] = &["день рождения", "родился", "родилась", "др"];

const EXPLICIT_TRIGGERS: &[&str] = &[
    "создай контакт",
    "создать контакт",
    "добавь контакт",
    "добавить контакт",
    "новый контакт",
    "запиши контакт",
    "создай человека",
    "добавь человека",
];

const UPDATE_TRIGGERS: &[&str] = &[
    "обнови контакт",
    "обновить контакт",
    "измени контакт",
    "изменить контакт",
    "дополни контакт",
    "обнови карточку",
    "измени карточку",
    "дополни карточку",
];

const WORKPLACE_MARKER: &str = "работает";

fn skip_spaces(text: &str, pos: usize) -> usize {
    text.len() - text[pos..].trim_start().len()
}

fn is_name_word(word: &Phrase, require_capital: bool) -> bool {
    let lowered = word.lowered.as_str();
    if lowered.chars().count() < 2 || !lowered.chars().all(|c| c.is_alphabetic() || c == '-') {
        return false;
    }
    if NON_NAME_WORDS.contains(&lowered)
        || RELATION_WORDS.contains(&lowered)
        || WEAKNESS_WORDS.contains(&lowered)
        || VERB_ENDINGS.iter().any(|ending| lowered.ends_with(ending))
    {
        return false;
    }
    !require_capital
        || word
            .original
            .chars()
            .next()
            .map(char::is_uppercase)
            .unwrap_or(false)
}

/// Two or three leading name words. Returns the title-cased name, the rest,
/// and whether a list separator followed the name.
fn split_name(phrase: &Phrase, require_capital: bool) -> Option<(String, Phrase, bool)> {
    let mut taken = 0;
    let mut end = 0;
    let mut separated = false;
    for (start, word_end) in phrase.word_spans().into_iter().take(3) {
        let raw = phrase.slice(start, word_end);
        if !is_name_word(&raw.trim_punct(), require_capital) {
            break;
        }
        taken += 1;
        end = word_end;
        if raw.lowered.ends_with([',', ';', ':']) {
            separated = true;
            break;
        }
    }
    if taken < 2 {
        return None;
    }
    let name = title_case(&phrase.slice(0, end).trim_punct().original);
    Some((name, phrase.after(end), separated))
}

fn birth_date_mention(phrase: &Phrase, today: NaiveDate) -> Option<DateMention> {
    find_absolute_date(&phrase.lowered, today)
        .filter(|m| has_explicit_year(&phrase.lowered[m.start..m.end]))
}

fn strip_possessive(token: &Phrase) -> Phrase {
    match POSSESSIVES.iter().find(|p| token.find_word(p) == Some(0)) {
        Some(p) => token.after(p.len()),
        None => token.clone(),
    }
}

fn push_joined(slot: &mut Option<String>, values: Vec<String>) {
    if values.is_empty() {
        return;
    }
    let joined = values.join(", ");
    *slot = Some(match slot.take() {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, joined),
        _ => joined,
    });
}

/// Sort the free text after a name into relation, traits, workplace and birth date.
pub fn classify_person_details(rest: &Phrase, fields: &mut PersonFields, today: NaiveDate) {
    let mut rest = rest.clone();

    if fields.birth_date.is_none() {
        if let Some(m) = birth_date_mention(&rest, today) {
            fields.birth_date = Some(m.date);
            rest = rest.cut(m.start, m.end);
        }
    }
    rest = rest.remove_words(BIRTH_MARKERS);

    if let Some(start) = rest.find_word(WORKPLACE_MARKER) {
        let text = rest.lowered.as_str();
        let mut pos = skip_spaces(text, start + WORKPLACE_MARKER.len());
        if let Some(prep) = ["в", "во", "на"]
            .iter()
            .find(|p| find_word(&text[pos..], p) == Some(0))
        {
            pos = skip_spaces(text, pos + prep.len());
        }
        let place_end = text[pos..]
            .find([',', ';'])
            .map(|i| pos + i)
            .unwrap_or(text.len());
        let place = rest.slice(pos, place_end).trim_punct();
        if !place.is_empty() {
            fields.workplace = Some(place.original);
        }
        rest = rest.cut(start, place_end);
    }

    let tokens = if rest.lowered.contains([',', ';']) {
        rest.split_on(',')
            .into_iter()
            .flat_map(|part| part.split_on(';'))
            .collect::<Vec<_>>()
    } else {
        rest.words()
    };

    let mut relations = Vec::new();
    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    for token in tokens {
        let token = strip_possessive(&token.trim_punct());
        if token.is_empty() || FILLER_TOKENS.contains(&token.lowered.as_str()) {
            continue;
        }
        let is_relation = contains_any_word(&token.lowered, RELATION_WORDS)
            || RELATION_STEMS.iter().any(|stem| token.lowered.contains(stem));
        if is_relation {
            relations.push(token.original);
        } else if contains_any_word(&token.lowered, WEAKNESS_WORDS) {
            weaknesses.push(token.original);
        } else {
            strengths.push(token.original);
        }
    }

    push_joined(&mut fields.relation, relations);
    push_joined(&mut fields.strengths, strengths);
    push_joined(&mut fields.weaknesses, weaknesses);
}

/// "Иван Петров 12.05.1990 друг, добрый": the birth date anchors the parse.
pub struct DatedContactRule;

impl Rule for DatedContactRule {
    fn name(&self) -> &'static str {
        "dated_contact"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let Some(mention) = birth_date_mention(input.phrase, input.today) else {
            return RuleOutcome::Skip;
        };
        let head = input.phrase.before(mention.start);
        let Some((full_name, leftover, _)) = split_name(&head, true) else {
            return RuleOutcome::Skip;
        };
        if !leftover.is_empty() {
            return RuleOutcome::Skip;
        }

        let mut fields = PersonFields {
            birth_date: Some(mention.date),
            ..PersonFields::default()
        };
        classify_person_details(&input.phrase.after(mention.end), &mut fields, input.today);
        RuleOutcome::Matched(Action::CreatePerson { full_name, fields })
    }
}

/// "Анна Смирнова, коллега, работает в Сбере". Needs a comma or a relation
/// word after the name, otherwise the message is too ambiguous.
pub struct UndatedContactRule;

impl Rule for UndatedContactRule {
    fn name(&self) -> &'static str {
        "undated_contact"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let Some((full_name, rest, separated)) = split_name(input.phrase, true) else {
            return RuleOutcome::Skip;
        };
        if rest.is_empty() {
            return RuleOutcome::Skip;
        }
        let gated = separated
            || rest.lowered.contains(',')
            || contains_any_word(&rest.lowered, RELATION_WORDS);
        if !gated {
            return RuleOutcome::Skip;
        }

        let mut fields = PersonFields::default();
        classify_person_details(&rest, &mut fields, input.today);
        RuleOutcome::Matched(Action::CreatePerson { full_name, fields })
    }
}

/// "создай контакт: Иван Петров, брат, надежный".
pub struct ExplicitContactRule;

impl Rule for ExplicitContactRule {
    fn name(&self) -> &'static str {
        "explicit_contact"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let Some((_, end)) = leading_trigger(input.phrase, EXPLICIT_TRIGGERS, input.today) else {
            return RuleOutcome::Skip;
        };
        let mut body = input.phrase.after(end);
        let mut fields = PersonFields::default();
        if let Some(m) = birth_date_mention(&body, input.today) {
            fields.birth_date = Some(m.date);
            body = body.cut(m.start, m.end);
        }

        let (full_name, rest) = if let Some((name, rest, _)) =
            split_name(&body, true).or_else(|| split_name(&body, false))
        {
            (name, rest)
        } else if let Some(comma) = body.lowered.find(',') {
            (title_case(&body.before(comma).original), body.after(comma + 1))
        } else {
            (title_case(&body.original), Phrase::new(""))
        };

        classify_person_details(&rest, &mut fields, input.today);
        RuleOutcome::Matched(Action::CreatePerson { full_name, fields })
    }
}

/// "обнови контакт Петров: работает в Яндексе".
pub struct UpdateContactRule;

impl Rule for UpdateContactRule {
    fn name(&self) -> &'static str {
        "update_contact"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let Some((_, end)) = leading_trigger(input.phrase, UPDATE_TRIGGERS, input.today) else {
            return RuleOutcome::Skip;
        };
        let body = input.phrase.after(end);

        let split_at = body.lowered.find(':').or_else(|| body.lowered.find(','));
        let (name_query, rest) = match split_at {
            Some(idx) => (body.before(idx), body.after(idx + 1)),
            None => match body.word_spans().first() {
                Some(&(_, word_end)) => (body.before(word_end), body.after(word_end)),
                None => (Phrase::new(""), Phrase::new("")),
            },
        };

        let mut fields = PersonFields::default();
        classify_person_details(&rest, &mut fields, input.today);
        RuleOutcome::Matched(Action::UpdatePerson {
            name_query: name_query.original,
            fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).expect("valid date")
    }

    fn apply(rule: &dyn Rule, text: &str) -> RuleOutcome {
        let phrase = Phrase::new(text);
        rule.apply(&RuleInput {
            phrase: &phrase,
            today: today(),
        })
    }

    fn details(text: &str) -> PersonFields {
        let mut fields = PersonFields::default();
        classify_person_details(&Phrase::new(text), &mut fields, today());
        fields
    }

    #[test]
    fn classification_by_vocabulary() {
        let fields = details("бизнес-партнер, щедрый, вспыльчивый, работает в Газпроме");
        assert_eq!(fields.relation.as_deref(), Some("бизнес-партнер"));
        assert_eq!(fields.strengths.as_deref(), Some("щедрый"));
        assert_eq!(fields.weaknesses.as_deref(), Some("вспыльчивый"));
        assert_eq!(fields.workplace.as_deref(), Some("Газпроме"));
    }

    #[test]
    fn space_separated_details() {
        let fields = details("моя сестра добрая упрямая");
        assert_eq!(fields.relation.as_deref(), Some("сестра"));
        assert_eq!(fields.strengths.as_deref(), Some("добрая"));
        assert_eq!(fields.weaknesses.as_deref(), Some("упрямая"));
    }

    #[test]
    fn dated_contact_requires_name_then_date() {
        assert_eq!(apply(&DatedContactRule, "Сдать отчет 20.10.2026"), RuleOutcome::Skip);
        assert_eq!(apply(&DatedContactRule, "Иван Петров 20.10"), RuleOutcome::Skip);
        assert!(matches!(
            apply(&DatedContactRule, "Мария Ивановна Кузнецова 03.03.1961, бабушка"),
            RuleOutcome::Matched(Action::CreatePerson { ref full_name, .. })
                if full_name == "Мария Ивановна Кузнецова"
        ));
    }

    #[test]
    fn undated_contact_gate() {
        assert_eq!(apply(&UndatedContactRule, "Иван Петров молодец"), RuleOutcome::Skip);
        assert_eq!(apply(&UndatedContactRule, "хлеб молоко, сыр"), RuleOutcome::Skip);
        assert_eq!(apply(&UndatedContactRule, "Привет Анна, как ты"), RuleOutcome::Skip);
        match apply(&UndatedContactRule, "Олег Сидоров брат") {
            RuleOutcome::Matched(Action::CreatePerson { full_name, fields }) => {
                assert_eq!(full_name, "Олег Сидоров");
                assert_eq!(fields.relation.as_deref(), Some("брат"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn explicit_contact_accepts_lowercase_names() {
        match apply(&ExplicitContactRule, "создай контакт: иван петров, брат, надежный") {
            RuleOutcome::Matched(Action::CreatePerson { full_name, fields }) => {
                assert_eq!(full_name, "Иван Петров");
                assert_eq!(fields.relation.as_deref(), Some("брат"));
                assert_eq!(fields.strengths.as_deref(), Some("надежный"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match apply(&ExplicitContactRule, "добавь контакт Мама, день рождения 08.03.1965") {
            RuleOutcome::Matched(Action::CreatePerson { full_name, fields }) => {
                assert_eq!(full_name, "Мама");
                assert_eq!(fields.birth_date, NaiveDate::from_ymd_opt(1965, 3, 8));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn update_target_before_separator() {
        match apply(&UpdateContactRule, "обнови карточку Анна Смирнова, подруга") {
            RuleOutcome::Matched(Action::UpdatePerson { name_query, fields }) => {
                assert_eq!(name_query, "Анна Смирнова");
                assert_eq!(fields.relation.as_deref(), Some("подруга"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
