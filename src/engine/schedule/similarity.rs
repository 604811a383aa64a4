// Pairwise schedule similarity via the Tool model.
// The verdict decides which of a similar pair survives: keep the existing
// row (refuse the new one) or retire the existing row (keep the new one).
// An unreachable service or unparsable reply means "no signal" — the caller
// skips the check entirely rather than failing the creation.

use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use crate::engine::store::ScheduleRow;
use log::{info, warn};
use serde::Deserialize;

use super::CreateSchedule;

#[derive(Debug, Deserialize)]
struct ComparisonReply {
    is_similar: bool,
    #[serde(default)]
    keep_schedule: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
}

/// Outcome of the similarity pass over a day's schedules.
#[derive(Debug, Clone)]
pub enum SimilarityVerdict {
    /// The new schedule loses; creation is refused.
    KeepExisting { existing_title: String },
    /// The existing peer loses; it is soft-deleted and creation proceeds.
    KeepNew { existing_id: String },
}

pub struct SimilarityChecker {
    chat: ChatModel,
}

impl SimilarityChecker {
    pub fn new(chat: ChatModel) -> Self {
        Self { chat }
    }

    /// Compare the new schedule against each same-day peer until a similar
    /// one is found. None means: nothing similar, or no usable signal.
    pub async fn resolve(
        &self,
        new_schedule: &CreateSchedule,
        existing: &[ScheduleRow],
    ) -> Option<SimilarityVerdict> {
        for peer in existing {
            let Some(reply) = self.compare(new_schedule, peer).await else {
                // No signal from the service — skip the whole check.
                return None;
            };
            if !reply.is_similar {
                continue;
            }
            info!(
                "[schedule] similarity hit: '{}' vs '{}' → keep {}",
                new_schedule.title, peer.title, reply.keep_schedule
            );
            return match reply.keep_schedule.as_str() {
                "new" => Some(SimilarityVerdict::KeepNew { existing_id: peer.schedule_id.clone() }),
                "existing" => {
                    Some(SimilarityVerdict::KeepExisting { existing_title: peer.title.clone() })
                }
                _ => None,
            };
        }
        None
    }

    async fn compare(
        &self,
        new_schedule: &CreateSchedule,
        existing: &ScheduleRow,
    ) -> Option<ComparisonReply> {
        let system = "你是一个日程管理专家。你需要判断两个日程是否相似，以及应该保留哪一个。\n\n\
            判断标准：\n\
            1. 主题、活动内容基本一致，视为相似日程\n\
            2. 时间地点略有差异但核心活动相同，也视为相似\n\
            3. 明确是不同的活动则不相似\n\n\
            相似时保留信息更详细、更完整的那一个。\n\n\
            请返回JSON格式（只返回JSON）：\n\
            {\"is_similar\": true, \"reason\": \"判断理由\", \"keep_schedule\": \"new\"}\n\
            keep_schedule 取值：new（保留新日程）/ existing（保留已有日程）/ none（不相似）";

        let user = format!(
            "请判断以下两个日程是否相似，如果相似，应该保留哪一个：\n\n\
             【新日程】\n标题：{}\n描述：{}\n开始时间：{}\n结束时间：{}\n\n\
             【已有日程】\n标题：{}\n描述：{}\n开始时间：{}\n结束时间：{}",
            new_schedule.title,
            new_schedule.description,
            new_schedule.start_time,
            new_schedule.end_time,
            existing.title,
            existing.description,
            existing.start_time,
            existing.end_time,
        );

        let request = [ChatMessage::system(system), ChatMessage::user(user)];
        match self.chat.chat(&request, ModelTier::Tool).await {
            Ok(reply) => match llm_json::parse_strict::<ComparisonReply>(&reply) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("[schedule] similarity reply unparsable, skipping check: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("[schedule] similarity service unreachable, skipping check: {e}");
                None
            }
        }
    }
}
