// Eidolon Engine — Dynamic Task Graph
// A four-node state machine executing a task event through dynamically
// composed sub-agents:
//
//   orchestrate → {execute_parallel | execute_sequential | end}
//   execute_parallel   → {execute_parallel | synthesize | end}
//   execute_sequential → {execute_sequential | synthesize | end}
//   synthesize → end
//
// The orchestrator (Main tier) decides the strategy and the agent roster;
// parallel execution runs up to 3 sub-agents concurrently and tolerates
// individual failures; sequential execution resolves dependencies and
// detects deadlock before invoking anything; synthesis (Main tier) merges
// the results, degrading to role-headed concatenation when the call fails.
// State is checkpointed at every node boundary under the caller's thread id.

pub mod checkpoint;

pub use checkpoint::{Checkpointer, MemoryCheckpointer, StoreCheckpointer};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ChatMessage, ModelTier};
use crate::engine::llm_json;
use crate::engine::providers::ChatModel;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const MAX_PARALLEL_AGENTS: usize = 3;

// ── State types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Orchestrate,
    ExecuteParallel,
    ExecuteSequential,
    Synthesize,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub role: String,
    #[serde(default)]
    pub description: String,
    pub task: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "pending_status")]
    pub status: AgentStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

fn pending_status() -> AgentStatus {
    AgentStatus::Pending
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationLog {
    pub ts: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub action: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEventSnapshot {
    pub event_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub criteria: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationPlan {
    #[serde(default)]
    pub complexity: String,
    pub execution_strategy: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
    #[serde(default)]
    pub direct_result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraphState {
    pub task_event: TaskEventSnapshot,
    pub character_context: Value,
    pub orchestration_plan: Option<OrchestrationPlan>,
    pub agents: Vec<AgentRecord>,
    pub agent_results: HashMap<String, String>,
    pub collaboration_logs: Vec<CollaborationLog>,
    pub final_result: Option<String>,
    pub error: Option<String>,
    pub next_action: NextAction,
}

impl TaskGraphState {
    pub fn initial(task_event: TaskEventSnapshot, character_context: Value) -> Self {
        Self {
            task_event,
            character_context,
            orchestration_plan: None,
            agents: Vec::new(),
            agent_results: HashMap::new(),
            collaboration_logs: Vec::new(),
            final_result: None,
            error: None,
            next_action: NextAction::Orchestrate,
        }
    }

    fn log(&mut self, agent: Option<&AgentRecord>, action: &str, content: &str) {
        self.collaboration_logs.push(CollaborationLog {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            agent_id: agent.map(|a| a.agent_id.clone()),
            role: agent.map(|a| a.role.clone()),
            action: action.to_string(),
            content: content.to_string(),
        });
    }
}

// ── Run report ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct TaskRunReport {
    pub success: bool,
    /// Partial success: some agents failed but at least one succeeded.
    pub partial: bool,
    pub result: String,
    /// Set on the simple path: the host decides when to mark the event
    /// completed after delivering the result.
    pub requires_delivery_confirmation: bool,
    pub successful_agents: usize,
    pub failed_agents: usize,
    pub collaboration_logs: Vec<CollaborationLog>,
}

// ── The engine ─────────────────────────────────────────────────────────────

pub struct TaskGraphEngine {
    chat: ChatModel,
    checkpointer: Arc<dyn Checkpointer>,
}

impl TaskGraphEngine {
    pub fn new(chat: ChatModel, checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self { chat, checkpointer }
    }

    /// Run (or resume) the graph for one task event.
    pub async fn run(
        &self,
        thread_id: &str,
        task_event: TaskEventSnapshot,
        character_context: Value,
    ) -> EngineResult<TaskRunReport> {
        let mut state = match self.checkpointer.load(thread_id)? {
            Some(saved) if saved.next_action != NextAction::End => {
                info!("[taskgraph] resuming thread {thread_id} at {:?}", saved.next_action);
                saved
            }
            _ => TaskGraphState::initial(task_event, character_context),
        };

        while state.next_action != NextAction::End {
            match state.next_action {
                NextAction::Orchestrate => self.orchestrate_node(&mut state).await,
                NextAction::ExecuteParallel => self.parallel_node(&mut state).await,
                NextAction::ExecuteSequential => self.sequential_node(&mut state).await?,
                NextAction::Synthesize => self.synthesize_node(&mut state).await,
                NextAction::End => unreachable!(),
            }
            self.checkpointer.save(thread_id, &state)?;
        }

        Ok(Self::report(&state))
    }

    fn report(state: &TaskGraphState) -> TaskRunReport {
        let successful = state
            .agents
            .iter()
            .filter(|a| a.status == AgentStatus::Completed)
            .count();
        let failed = state.agents.iter().filter(|a| a.status == AgentStatus::Failed).count();

        let is_simple = state
            .orchestration_plan
            .as_ref()
            .map(|p| p.execution_strategy == "simple")
            .unwrap_or(false);

        // All agents failing (with agents present) is a failed run; the
        // partial text still travels in `result`.
        let success = state.error.is_none() && !(failed > 0 && successful == 0);

        TaskRunReport {
            success,
            partial: success && failed > 0,
            result: state
                .final_result
                .clone()
                .unwrap_or_else(|| state.error.clone().unwrap_or_default()),
            requires_delivery_confirmation: is_simple && success,
            successful_agents: successful,
            failed_agents: failed,
            collaboration_logs: state.collaboration_logs.clone(),
        }
    }

    // ── orchestrate ───────────────────────────────────────────────────

    async fn orchestrate_node(&self, state: &mut TaskGraphState) {
        state.log(
            None,
            "progress",
            &format!("开始分析任务「{}」", state.task_event.title),
        );

        let event = state.task_event.clone();
        let prompt = format!(
            "你是一个任务编排专家，负责分析任务并决定最佳的执行策略。\n\n\
             任务信息：\n- 标题：{}\n- 描述：{}\n- 要求：{}\n- 完成标准：{}\n\n\
             请分析这个任务，并决定：\n\
             1. 任务复杂度（simple/medium/complex）\n\
             2. 最佳执行策略（simple/parallel/sequential）\n\
             3. 需要的智能体列表\n\n\
             执行策略说明：\n\
             - simple: 任务很简单，可以直接回答，不需要多智能体\n\
             - parallel: 任务可分解为多个独立子任务，智能体并行执行\n\
             - sequential: 任务需按步骤执行，后续步骤依赖前面的结果\n\n\
             请以JSON格式返回（只返回JSON）：\n\
             {{\"complexity\": \"simple|medium|complex\",\n \
             \"execution_strategy\": \"simple|parallel|sequential\",\n \
             \"reasoning\": \"分析理由\",\n \
             \"agents\": [{{\"agent_id\": \"唯一ID\", \"role\": \"角色名称\", \
             \"description\": \"职责描述\", \"task\": \"具体任务\", \
             \"dependencies\": []}}],\n \
             \"direct_result\": \"simple策略时直接提供结果\"}}",
            event.title,
            event.description,
            if event.requirements.is_empty() { "无" } else { &event.requirements },
            if event.criteria.is_empty() { "无" } else { &event.criteria },
        );

        let request = [
            ChatMessage::system("你是一个专业的任务编排专家。"),
            ChatMessage::user(prompt),
        ];

        let plan: OrchestrationPlan = match self.chat.chat(&request, ModelTier::Main).await {
            Ok(reply) => match llm_json::parse_strict(&reply) {
                Ok(plan) => plan,
                Err(e) => {
                    state.error = Some(format!("编排计划解析失败: {e}"));
                    state.next_action = NextAction::End;
                    return;
                }
            },
            Err(e) => {
                state.error = Some(format!("编排失败: {e}"));
                state.next_action = NextAction::End;
                return;
            }
        };

        state.next_action = match plan.execution_strategy.as_str() {
            "parallel" => {
                state.agents = plan.agents.clone();
                state.log(
                    None,
                    "progress",
                    &format!("采用并行执行策略，共{}个智能体", state.agents.len()),
                );
                NextAction::ExecuteParallel
            }
            "sequential" => {
                state.agents = plan.agents.clone();
                state.log(
                    None,
                    "progress",
                    &format!("采用顺序执行策略，共{}个步骤", state.agents.len()),
                );
                NextAction::ExecuteSequential
            }
            _ => {
                state.final_result = Some(
                    plan.direct_result
                        .clone()
                        .unwrap_or_else(|| "任务过于简单，无需多智能体协作".to_string()),
                );
                NextAction::End
            }
        };
        state.orchestration_plan = Some(plan);
    }

    // ── execute_parallel ──────────────────────────────────────────────

    /// Run every pending agent concurrently, bounded by a worker pool of
    /// min(pending, 3). One agent failing never cancels the others; the
    /// node waits for all to settle.
    async fn parallel_node(&self, state: &mut TaskGraphState) {
        let pending: Vec<AgentRecord> = state
            .agents
            .iter()
            .filter(|a| a.status == AgentStatus::Pending)
            .cloned()
            .collect();
        if pending.is_empty() {
            state.next_action = NextAction::Synthesize;
            return;
        }

        state.log(None, "progress", &format!("并行执行{}个智能体任务", pending.len()));

        let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL_AGENTS.min(pending.len())));
        let mut join_set: JoinSet<(String, Result<String, String>)> = JoinSet::new();

        for agent in pending {
            let permit_pool = semaphore.clone();
            let chat = self.chat.clone();
            let context = self.agent_context(state, &agent);
            join_set.spawn(async move {
                let _permit = permit_pool.acquire_owned().await.ok();
                let outcome = execute_sub_agent(&chat, &agent, &context).await;
                (agent.agent_id, outcome.map_err(|e| e.to_string()))
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let Ok((agent_id, outcome)) = joined else {
                warn!("[taskgraph] sub-agent task panicked");
                continue;
            };
            self.record_outcome(state, &agent_id, outcome);
        }

        let remaining =
            state.agents.iter().any(|a| a.status == AgentStatus::Pending);
        state.next_action = if remaining {
            NextAction::ExecuteParallel
        } else {
            NextAction::Synthesize
        };
    }

    // ── execute_sequential ────────────────────────────────────────────

    /// Execute the first pending agent whose dependencies are all
    /// completed. When none qualifies while work remains, the dependency
    /// graph is cyclic and the run fails before any further invocation.
    async fn sequential_node(&self, state: &mut TaskGraphState) -> EngineResult<()> {
        let pending: Vec<AgentRecord> = state
            .agents
            .iter()
            .filter(|a| a.status == AgentStatus::Pending)
            .cloned()
            .collect();
        if pending.is_empty() {
            state.next_action = NextAction::Synthesize;
            return Ok(());
        }

        let executable = pending.into_iter().find(|agent| {
            agent.dependencies.iter().all(|dep| {
                state
                    .agents
                    .iter()
                    .any(|a| &a.agent_id == dep && a.status == AgentStatus::Completed)
            })
        });

        let Some(agent) = executable else {
            state.error = Some("无法找到可执行的智能体，依赖关系存在循环".to_string());
            state.next_action = NextAction::End;
            return Err(EngineError::DependencyDeadlock(
                "sequential plan has a dependency cycle".into(),
            ));
        };

        state.log(Some(&agent), "progress", &format!("执行智能体 [{}] 的任务", agent.role));
        let context = self.agent_context(state, &agent);
        let outcome = execute_sub_agent(&self.chat, &agent, &context)
            .await
            .map_err(|e| e.to_string());
        self.record_outcome(state, &agent.agent_id, outcome);

        let remaining =
            state.agents.iter().any(|a| a.status == AgentStatus::Pending);
        state.next_action = if remaining {
            NextAction::ExecuteSequential
        } else {
            NextAction::Synthesize
        };
        Ok(())
    }

    // ── synthesize ────────────────────────────────────────────────────

    async fn synthesize_node(&self, state: &mut TaskGraphState) {
        state.log(None, "progress", "整合所有智能体的结果");

        let sections: String = state
            .agents
            .iter()
            .map(|a| {
                format!(
                    "[{}] 的结果：\n{}\n\n",
                    a.role,
                    state
                        .agent_results
                        .get(&a.agent_id)
                        .map(String::as_str)
                        .unwrap_or("未执行")
                )
            })
            .collect();

        let prompt = format!(
            "请整合以下多个智能体的工作结果，生成一个完整、连贯的最终答案。\n\n\
             原始任务：{}\n\n各智能体的结果：\n{sections}\
             请将这些结果整合成一个完整的答案，确保内容连贯、覆盖所有重要信息、\
             去除重复内容。直接输出最终答案，不要添加额外的说明。",
            state.task_event.title
        );
        let request = [
            ChatMessage::system("你是一个信息整合专家，擅长将多个来源的信息整合成连贯的答案。"),
            ChatMessage::user(prompt),
        ];

        state.final_result = Some(match self.chat.chat(&request, ModelTier::Main).await {
            Ok(text) => text,
            Err(e) => {
                // Degrade to verbatim concatenation with role headers.
                warn!("[taskgraph] synthesis failed, concatenating results: {e}");
                state
                    .agents
                    .iter()
                    .map(|a| {
                        format!(
                            "【{}】\n{}",
                            a.role,
                            state
                                .agent_results
                                .get(&a.agent_id)
                                .map(String::as_str)
                                .unwrap_or("未执行")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        });
        state.next_action = NextAction::End;
    }

    // ── shared helpers ────────────────────────────────────────────────

    /// Context view for one agent: the task event, the character, and the
    /// results of any already-completed dependencies.
    fn agent_context(&self, state: &TaskGraphState, agent: &AgentRecord) -> Value {
        let mut context = serde_json::json!({
            "task_info": {
                "title": state.task_event.title,
                "description": state.task_event.description,
            },
            "character": state.character_context,
        });
        if !agent.dependencies.is_empty() {
            let dependency_results: HashMap<&String, &str> = agent
                .dependencies
                .iter()
                .map(|dep| {
                    (dep, state.agent_results.get(dep).map(String::as_str).unwrap_or("未执行"))
                })
                .collect();
            context["dependency_results"] = serde_json::json!(dependency_results);
        }
        context
    }

    fn record_outcome(
        &self,
        state: &mut TaskGraphState,
        agent_id: &str,
        outcome: Result<String, String>,
    ) {
        let Some(idx) = state.agents.iter().position(|a| a.agent_id == agent_id) else {
            return;
        };
        match outcome {
            Ok(result) => {
                let snapshot = {
                    let agent = &mut state.agents[idx];
                    agent.status = AgentStatus::Completed;
                    agent.result = Some(result.clone());
                    agent.clone()
                };
                state.agent_results.insert(agent_id.to_string(), result.clone());
                let preview: String = result.chars().take(200).collect();
                state.log(Some(&snapshot), "任务完成", &preview);
            }
            Err(error) => {
                let snapshot = {
                    let agent = &mut state.agents[idx];
                    agent.status = AgentStatus::Failed;
                    agent.error = Some(error.clone());
                    agent.clone()
                };
                state
                    .agent_results
                    .insert(agent_id.to_string(), format!("执行失败: {error}"));
                state.log(Some(&snapshot), "任务失败", &error);
            }
        }
    }
}

/// One-shot sub-agent invocation: a Tool-tier call playing the agent's role
/// against its scoped task and dependency-derived context. The returned
/// text IS the agent's result — no structural parsing here.
async fn execute_sub_agent(
    chat: &ChatModel,
    agent: &AgentRecord,
    context: &Value,
) -> EngineResult<String> {
    let system = format!(
        "你是一个{role}。\n\n你的职责：{description}\n\n当前任务：{task}\n\n\
         上下文信息：\n{context}\n\n\
         请按照任务要求完成你的工作。输出格式：直接输出你的工作结果，简洁明了。",
        role = agent.role,
        description = agent.description,
        task = agent.task,
        context = serde_json::to_string_pretty(context).unwrap_or_default(),
    );
    let request = [
        ChatMessage::system(system),
        ChatMessage::user(format!("请完成任务：{}", agent.task)),
    ];
    chat.chat(&request, ModelTier::Tool).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::providers::testing::{scripted_model, Scripted};

    fn snapshot() -> TaskEventSnapshot {
        TaskEventSnapshot {
            event_id: "evt-1".into(),
            title: "写一份报告".into(),
            description: "关于历史人物的调查".into(),
            requirements: "要有三个部分".into(),
            criteria: "内容完整".into(),
        }
    }

    fn plan_json(strategy: &str, agents: &str) -> String {
        format!(
            r#"{{"complexity": "medium", "execution_strategy": "{strategy}",
                "reasoning": "r", "agents": {agents}, "direct_result": null}}"#
        )
    }

    fn engine_with(script: Vec<Scripted>) -> TaskGraphEngine {
        let (chat, _) = scripted_model(script);
        TaskGraphEngine::new(chat, Arc::new(MemoryCheckpointer::new()))
    }

    #[tokio::test]
    async fn simple_strategy_returns_direct_result() {
        let engine = engine_with(vec![Scripted::Reply(
            r#"{"complexity": "simple", "execution_strategy": "simple",
                "reasoning": "trivial", "agents": [], "direct_result": "直接答案"}"#
                .into(),
        )]);
        let report = engine
            .run("t-simple", snapshot(), serde_json::json!({}))
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.result, "直接答案");
        assert!(report.requires_delivery_confirmation);
    }

    #[tokio::test]
    async fn parallel_with_one_failure_is_partial_success() {
        let agents = r#"[
            {"agent_id": "a1", "role": "研究员", "description": "查资料", "task": "t1", "dependencies": []},
            {"agent_id": "a2", "role": "分析师", "description": "分析", "task": "t2", "dependencies": []},
            {"agent_id": "a3", "role": "作者", "description": "写作", "task": "t3", "dependencies": []}
        ]"#;
        let engine = engine_with(vec![
            Scripted::Reply(plan_json("parallel", agents)),
            Scripted::Reply("结果一".into()),
            Scripted::Reply("结果二".into()),
            Scripted::Fail("sub-agent offline".into()),
            // The remaining standing reply serves the synthesis call.
            Scripted::Reply("综合后的最终结果".into()),
        ]);

        let report = engine
            .run("t-parallel", snapshot(), serde_json::json!({"name": "小可"}))
            .await
            .unwrap();
        assert!(report.success, "two successes make a (partial) success");
        assert!(report.partial);
        assert_eq!(report.successful_agents, 2);
        assert_eq!(report.failed_agents, 1);
        assert!(!report.result.is_empty());
        assert!(report
            .collaboration_logs
            .iter()
            .any(|l| l.action == "任务失败"));
    }

    #[tokio::test]
    async fn all_agents_failing_fails_the_run() {
        let agents = r#"[
            {"agent_id": "a1", "role": "研究员", "description": "", "task": "t1", "dependencies": []}
        ]"#;
        let engine = engine_with(vec![
            Scripted::Reply(plan_json("parallel", agents)),
            Scripted::Fail("offline".into()),
            Scripted::Reply("synthesis anyway".into()),
        ]);
        let report = engine
            .run("t-allfail", snapshot(), serde_json::json!({}))
            .await
            .unwrap();
        assert!(!report.success);
        assert!(!report.result.is_empty(), "final_result still set");
    }

    #[tokio::test]
    async fn sequential_respects_dependency_order() {
        let agents = r#"[
            {"agent_id": "writer", "role": "作者", "description": "", "task": "write", "dependencies": ["research"]},
            {"agent_id": "research", "role": "研究员", "description": "", "task": "research", "dependencies": []}
        ]"#;
        let (chat, backend) = scripted_model(vec![
            Scripted::Reply(plan_json("sequential", agents)),
            Scripted::Reply("研究结论".into()),
            Scripted::Reply("成稿".into()),
            Scripted::Reply("整合完成".into()),
        ]);
        let engine = TaskGraphEngine::new(chat, Arc::new(MemoryCheckpointer::new()));
        let report = engine
            .run("t-seq", snapshot(), serde_json::json!({}))
            .await
            .unwrap();
        assert!(report.success);

        // The writer's prompt (third call) must carry the research result.
        let calls = backend.calls.lock();
        let writer_prompt = &calls[2].1[0].content;
        assert!(writer_prompt.contains("研究结论"), "dependency result injected");
    }

    #[tokio::test]
    async fn dependency_cycle_deadlocks_without_invoking_agents() {
        let agents = r#"[
            {"agent_id": "a", "role": "甲", "description": "", "task": "ta", "dependencies": ["b"]},
            {"agent_id": "b", "role": "乙", "description": "", "task": "tb", "dependencies": ["a"]}
        ]"#;
        let (chat, backend) = scripted_model(vec![
            Scripted::Reply(plan_json("sequential", agents)),
            Scripted::Reply("should never be called".into()),
        ]);
        let engine = TaskGraphEngine::new(chat, Arc::new(MemoryCheckpointer::new()));
        let err = engine
            .run("t-cycle", snapshot(), serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DependencyDeadlock(_)));
        // Only the orchestration call happened.
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn synthesis_failure_degrades_to_concatenation() {
        let agents = r#"[
            {"agent_id": "a1", "role": "研究员", "description": "", "task": "t1", "dependencies": []}
        ]"#;
        let engine = engine_with(vec![
            Scripted::Reply(plan_json("parallel", agents)),
            Scripted::Reply("原始结果".into()),
            Scripted::Fail("synthesis offline".into()),
        ]);
        let report = engine
            .run("t-degrade", snapshot(), serde_json::json!({}))
            .await
            .unwrap();
        assert!(report.success);
        assert!(report.result.contains("【研究员】"));
        assert!(report.result.contains("原始结果"));
    }

    #[tokio::test]
    async fn unparsable_plan_ends_with_error() {
        let engine = engine_with(vec![Scripted::Reply("抱歉，我不会编排".into())]);
        let report = engine
            .run("t-badplan", snapshot(), serde_json::json!({}))
            .await
            .unwrap();
        assert!(!report.success);
        assert!(report.result.contains("解析失败"));
    }

    #[tokio::test]
    async fn checkpoint_persists_completed_state() {
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let (chat, _) = scripted_model(vec![Scripted::Reply(
            r#"{"complexity": "simple", "execution_strategy": "simple",
                "reasoning": "", "agents": [], "direct_result": "done"}"#
                .into(),
        )]);
        let engine = TaskGraphEngine::new(chat, checkpointer.clone());
        engine.run("t-ckpt", snapshot(), serde_json::json!({})).await.unwrap();

        let saved = checkpointer.load("t-ckpt").unwrap().unwrap();
        assert_eq!(saved.next_action, NextAction::End);
        assert_eq!(saved.final_result.as_deref(), Some("done"));
    }
}
