//! Process-wide turn statistics: counters plus latency decomposition sums,
//! guarded by their own short critical section.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Snapshot of the counters with derived averages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnStats {
    pub total_turns: u32,
    pub success_turns: u32,
    pub failed_turns: u32,
    pub timeout_turns: u32,
    pub context_budget_hits: u32,
    pub tool_budget_hits: u32,
    pub iter_limit_hits: u32,
    pub llm_error_turns: u32,
    pub outbound_enqueue_failures: u32,
    pub outbound_send_failures: u32,
    pub max_turn_latency_ms: u64,
    pub last_turn_latency_ms: u64,
    pub last_run_id: u32,
    pub avg_turn_latency_ms: u64,
    pub avg_context_ms: u64,
    pub avg_llm_ms: u64,
    pub avg_tools_ms: u64,
    pub avg_outbound_ms: u64,
}

/// Everything one turn reports at its end.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub run_id: u32,
    pub success: bool,
    pub total_ms: u64,
    pub context_ms: u64,
    pub llm_ms: u64,
    pub tools_ms: u64,
    pub outbound_ms: u64,
    pub hit_timeout: bool,
    pub hit_context_budget: bool,
    pub hit_tool_budget: bool,
    pub hit_iter_limit: bool,
    pub hit_llm_error: bool,
    pub outbound_enqueue_failed: bool,
}

#[derive(Default)]
struct StatsState {
    total_turns: u32,
    success_turns: u32,
    failed_turns: u32,
    timeout_turns: u32,
    context_budget_hits: u32,
    tool_budget_hits: u32,
    iter_limit_hits: u32,
    llm_error_turns: u32,
    outbound_enqueue_failures: u32,
    outbound_send_failures: u32,
    max_turn_latency_ms: u64,
    last_turn_latency_ms: u64,
    last_run_id: u32,
    sum_turn_latency_ms: u64,
    sum_context_ms: u64,
    sum_llm_ms: u64,
    sum_tools_ms: u64,
    sum_outbound_ms: u64,
}

#[derive(Default)]
pub struct StatsTracker {
    state: Mutex<StatsState>,
    run_seq: AtomicU32,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next monotonic per-turn run id.
    pub fn next_run_id(&self) -> u32 {
        self.run_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record(&self, outcome: &TurnOutcome) {
        let mut st = self.state.lock().unwrap();
        st.total_turns += 1;
        if outcome.success {
            st.success_turns += 1;
        } else {
            st.failed_turns += 1;
        }
        if outcome.hit_timeout {
            st.timeout_turns += 1;
        }
        if outcome.hit_context_budget {
            st.context_budget_hits += 1;
        }
        if outcome.hit_tool_budget {
            st.tool_budget_hits += 1;
        }
        if outcome.hit_iter_limit {
            st.iter_limit_hits += 1;
        }
        if outcome.hit_llm_error {
            st.llm_error_turns += 1;
        }
        if outcome.outbound_enqueue_failed {
            st.outbound_enqueue_failures += 1;
        }

        st.last_run_id = outcome.run_id;
        st.last_turn_latency_ms = outcome.total_ms;
        st.max_turn_latency_ms = st.max_turn_latency_ms.max(outcome.total_ms);
        st.sum_turn_latency_ms += outcome.total_ms;
        st.sum_context_ms += outcome.context_ms;
        st.sum_llm_ms += outcome.llm_ms;
        st.sum_tools_ms += outcome.tools_ms;
        st.sum_outbound_ms += outcome.outbound_ms;
    }

    pub fn record_outbound_send_failure(&self) {
        self.state.lock().unwrap().outbound_send_failures += 1;
    }

    pub fn snapshot(&self) -> TurnStats {
        let st = self.state.lock().unwrap();
        let total = u64::from(st.total_turns.max(1));
        TurnStats {
            total_turns: st.total_turns,
            success_turns: st.success_turns,
            failed_turns: st.failed_turns,
            timeout_turns: st.timeout_turns,
            context_budget_hits: st.context_budget_hits,
            tool_budget_hits: st.tool_budget_hits,
            iter_limit_hits: st.iter_limit_hits,
            llm_error_turns: st.llm_error_turns,
            outbound_enqueue_failures: st.outbound_enqueue_failures,
            outbound_send_failures: st.outbound_send_failures,
            max_turn_latency_ms: st.max_turn_latency_ms,
            last_turn_latency_ms: st.last_turn_latency_ms,
            last_run_id: st.last_run_id,
            avg_turn_latency_ms: if st.total_turns == 0 {
                0
            } else {
                st.sum_turn_latency_ms / total
            },
            avg_context_ms: if st.total_turns == 0 {
                0
            } else {
                st.sum_context_ms / total
            },
            avg_llm_ms: if st.total_turns == 0 {
                0
            } else {
                st.sum_llm_ms / total
            },
            avg_tools_ms: if st.total_turns == 0 {
                0
            } else {
                st.sum_tools_ms / total
            },
            avg_outbound_ms: if st.total_turns == 0 {
                0
            } else {
                st.sum_outbound_ms / total
            },
        }
    }
}
