// Eidolon Engine — Intent Tools
// LLM-backed classifiers over user input. Every classifier produces strict
// JSON; unparsable output or a transport failure yields the neutral
// "no intent" value — classification never throws past the caller.
//
// The schedule-intent classifier is paired with a deterministic
// time-expression resolver: when the model extracts a relative expression
// ("明天下午", "下周三上午", "tomorrow morning") but no concrete start
// time, the resolver maps it to an instant with a 2-hour default duration.
// An explicit clock digit ("3点", "15:30") is taken verbatim.

use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use chrono::{Datelike, Duration, NaiveDateTime};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// ── Schedule intent ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleIntent {
    #[serde(default)]
    pub has_schedule_intent: bool,
    #[serde(default = "none_string")]
    pub schedule_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub time_expression: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub involves_agent: bool,
    #[serde(default)]
    pub involves_user: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

fn none_string() -> String {
    "none".to_string()
}

impl ScheduleIntent {
    /// The neutral value: no intent recognised.
    pub fn none() -> Self {
        Self {
            has_schedule_intent: false,
            schedule_type: "none".into(),
            title: String::new(),
            description: String::new(),
            time_expression: String::new(),
            start_time: None,
            end_time: None,
            involves_agent: false,
            involves_user: false,
            confidence: 0.0,
            reasoning: "意图识别服务不可用".into(),
        }
    }

    pub fn is_appointment(&self) -> bool {
        self.has_schedule_intent && self.schedule_type == "appointment"
    }

    pub fn is_query(&self) -> bool {
        self.has_schedule_intent && self.schedule_type == "query"
    }
}

pub struct ScheduleIntentTool {
    chat: ChatModel,
}

impl ScheduleIntentTool {
    pub fn new(chat: ChatModel) -> Self {
        Self { chat }
    }

    /// Classify the input; fill missing start/end from the time expression.
    pub async fn recognize(
        &self,
        user_input: &str,
        character_name: &str,
        context: &str,
        now: NaiveDateTime,
    ) -> ScheduleIntent {
        let system = format!(
            "你是一个日程意图识别专家。请分析用户输入，识别其中是否包含日程相关的意图。\n\n\
             智能体名称：{character_name}\n\n\
             分析要点：\n\
             1. 判断是否包含邀约、约定、计划等日程相关内容\n\
             2. 提取时间信息（具体时间或相对时间如\"明天\"、\"下周三\"）\n\
             3. 判断是创建日程（appointment）还是查询日程（query）\n\
             4. 判断是否涉及智能体和/或用户\n\n\
             请以JSON格式输出（只返回JSON）：\n\
             {{\"has_schedule_intent\": true, \"schedule_type\": \"appointment\", \
             \"title\": \"日程标题\", \"description\": \"详细描述\", \
             \"time_expression\": \"提取的时间表达\", \"start_time\": null, \
             \"end_time\": null, \"involves_agent\": true, \"involves_user\": true, \
             \"confidence\": 0.9, \"reasoning\": \"分析理由\"}}"
        );
        let user = format!(
            "用户输入：\"{user_input}\"\n\n{}请分析这段输入，识别日程意图。",
            if context.is_empty() { String::new() } else { format!("对话上下文：{context}\n\n") }
        );

        let request = [ChatMessage::system(system), ChatMessage::user(user)];
        let mut intent = match self.chat.chat(&request, ModelTier::Tool).await {
            Ok(reply) => match llm_json::parse_strict::<ScheduleIntent>(&reply) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("[intent] schedule intent unparsable, treating as none: {e}");
                    return ScheduleIntent::none();
                }
            },
            Err(e) => {
                warn!("[intent] schedule intent call failed, treating as none: {e}");
                return ScheduleIntent::none();
            }
        };

        // Resolve relative time expressions when the model gave none.
        if intent.has_schedule_intent
            && intent.start_time.is_none()
            && !intent.time_expression.is_empty()
        {
            if let Some((start, end)) = resolve_time_expression(&intent.time_expression, now) {
                intent.start_time = Some(start.format("%Y-%m-%dT%H:%M:%S").to_string());
                intent.end_time = Some(end.format("%Y-%m-%dT%H:%M:%S").to_string());
            }
        }

        if intent.has_schedule_intent {
            info!(
                "[intent] schedule intent: type={} title='{}' time={:?}",
                intent.schedule_type, intent.title, intent.start_time
            );
        }
        intent
    }
}

// ── Time-expression resolver ───────────────────────────────────────────────

static WEEKDAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[周星期]([一二三四五六日天1-7])").unwrap());
static CLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[点时:：](\d{1,2})?").unwrap());

fn weekday_number(token: &str) -> Option<u32> {
    match token {
        "一" | "1" => Some(0),
        "二" | "2" => Some(1),
        "三" | "3" => Some(2),
        "四" | "4" => Some(3),
        "五" | "5" => Some(4),
        "六" | "6" => Some(5),
        "日" | "天" | "7" => Some(6),
        _ => None,
    }
}

/// Map a Chinese/English relative time expression to a concrete interval.
/// The end time defaults to two hours after the start. Returns None when
/// the expression carries no recognisable date anchor.
pub fn resolve_time_expression(
    expr: &str,
    now: NaiveDateTime,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let lower = expr.to_lowercase();

    // Date anchor.
    let target_date = if lower.contains("明天") || lower.contains("明日") || lower.contains("tomorrow")
    {
        now.date() + Duration::days(1)
    } else if lower.contains("大后天") {
        now.date() + Duration::days(3)
    } else if lower.contains("后天") {
        now.date() + Duration::days(2)
    } else if lower.contains("下周") || lower.contains("next week") {
        if let Some(caps) = WEEKDAY_RE.captures(&lower) {
            let target = weekday_number(caps.get(1)?.as_str())? as i64;
            let current = now.date().weekday().num_days_from_monday() as i64;
            let mut ahead = target - current + 7;
            if ahead <= 7 {
                ahead += 7;
            }
            now.date() + Duration::days(ahead)
        } else {
            now.date() + Duration::days(7)
        }
    } else if lower.contains("今天") || lower.contains("今日") || lower.contains("today") {
        now.date()
    } else if let Some(caps) = WEEKDAY_RE.captures(&lower) {
        // A bare weekday means this week's occurrence, or next week's when
        // the day has already passed.
        let target = weekday_number(caps.get(1)?.as_str())? as i64;
        let current = now.date().weekday().num_days_from_monday() as i64;
        let mut ahead = target - current;
        if ahead < 0 {
            ahead += 7;
        }
        now.date() + Duration::days(ahead)
    } else {
        return None;
    };

    // Clock time: an explicit "3点"/"15:30" match is used as-is; time-of-day
    // keywords only pick the hour when no digits were given; otherwise
    // default to 14:00.
    let (hour, minute) = if let Some(caps) = CLOCK_RE.captures(&lower) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        (hour.min(23), minute.min(59))
    } else if lower.contains("早上") || lower.contains("上午") || lower.contains("早晨") || lower.contains("morning") {
        (9, 0)
    } else if lower.contains("中午") || lower.contains("noon") {
        (12, 0)
    } else if lower.contains("下午") || lower.contains("afternoon") {
        (14, 0)
    } else if lower.contains("晚上") || lower.contains("傍晚") || lower.contains("evening") {
        (18, 0)
    } else if lower.contains("夜里") || lower.contains("深夜") || lower.contains("night") {
        (22, 0)
    } else {
        (14, 0)
    };

    let start = target_date.and_hms_opt(hour, minute, 0)?;
    Some((start, start + Duration::hours(2)))
}

// ── Query keywords ─────────────────────────────────────────────────────────

const SCHEDULE_QUERY_KEYWORDS: &[&str] = &[
    "日程", "安排", "计划", "行程", "什么时候", "有什么事", "忙不忙", "空闲", "有空",
    "在干什么", "在做什么",
];

/// Fast keyword pre-check for schedule-query phrasing (no LLM).
pub fn looks_like_schedule_query(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();
    SCHEDULE_QUERY_KEYWORDS.iter().any(|k| lower.contains(k))
}
