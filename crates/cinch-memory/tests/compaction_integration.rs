//! End-to-end tests for the compaction engine.
//!
//! The property tests run over a deterministic family of generated
//! histories: varying tool-run lengths, payload sizes, budgets and
//! short-term counts, with user turns sometimes arriving between a tool
//! call and its results.

use std::sync::{Arc, Mutex};

use cinch_memory::context::integrity::{is_well_paired, safe_split};
use cinch_memory::context::truncate::truncation_marker;
use cinch_memory::{
    FileMidTermStore, InMemoryMidTermStore, MemoryConfig, MemoryManager, Message, MessageRole,
    MidTermStore, PersistenceBridge, Stage, SummaryMessage, ToolCall, deserialize_state,
    serialize_state,
};

fn exact_config(max_tokens: usize) -> MemoryConfig {
    MemoryConfig::default()
        .with_max_tokens(max_tokens)
        .with_reserve_percent(0)
        .with_chars_per_token(1.0)
}

fn padded(prefix: &str, i: usize, width: usize) -> String {
    let head = format!("{prefix} {i} ");
    let pad = width.saturating_sub(head.len());
    format!("{head}{}", ".".repeat(pad))
}

fn alternating(turns: usize, width: usize) -> Vec<Message> {
    (0..turns)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(padded("question", i, width))
            } else {
                Message::assistant_text(padded("finding", i, width))
            }
        })
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn short_conversation_passes_through_unchanged() {
    let msgs = vec![
        Message::system("You are a data analyst."),
        Message::user("hi"),
        Message::assistant_text("hello"),
    ];
    let config = MemoryConfig::default().with_max_tokens(12_500);
    assert_eq!(config.budget_tokens(), 10_000);

    let (out, report) = MemoryManager::new()
        .manage_with_report(msgs.clone(), &config)
        .unwrap();
    assert_eq!(out, msgs);
    assert_eq!(report.stage, Stage::Unchanged);
}

fn big_payload_history() -> Vec<Message> {
    let mut msgs = vec![Message::system("You are a data analyst.")];
    for i in 0..3 {
        msgs.push(Message::user(format!("question {i}")));
        msgs.push(Message::assistant_text(format!("answer {i}")));
    }
    msgs.push(Message::assistant_tool_calls(vec![ToolCall::function(
        "call_1",
        "run_sql",
        r#"{"q":"select * from events"}"#,
    )]));
    msgs.push(Message::tool_result("call_1", "x".repeat(50_000)));
    msgs
}

#[test]
fn oversized_tool_payload_is_capped_at_ten_thousand() {
    let config = MemoryConfig::default().with_max_tokens(5_000);
    let (out, report) = MemoryManager::new()
        .manage_with_report(big_payload_history(), &config)
        .unwrap();

    assert_eq!(report.stage, Stage::LooseTruncate);
    let tool = out.last().unwrap();
    assert_eq!(
        tool.text(),
        format!("{}{}", "x".repeat(10_000), truncation_marker(40_000))
    );
    assert!(config.estimator().estimate(&out) <= config.budget_tokens());
}

#[test]
fn oversized_tool_payload_escalates_to_five_thousand() {
    let config = MemoryConfig::default().with_max_tokens(2_500);
    let (out, report) = MemoryManager::new()
        .manage_with_report(big_payload_history(), &config)
        .unwrap();

    assert_eq!(report.stage, Stage::TightTruncate);
    let tool = out.last().unwrap();
    assert_eq!(
        tool.text(),
        format!("{}{}", "x".repeat(5_000), truncation_marker(45_000))
    );
    assert!(config.estimator().estimate(&out) <= config.budget_tokens());
    assert_eq!(out[0], big_payload_history()[0]);
}

#[test]
fn split_never_lands_on_a_tool_result() {
    let msgs = vec![
        Message::system("sys"),
        Message::user("Chart revenue by region"),
        Message::assistant_tool_calls(vec![
            ToolCall::function("c1", "run_sql", "{}"),
            ToolCall::function("c2", "make_chart", "{}"),
        ]),
        Message::tool_result("c1", "rows"),
        Message::tool_result("c2", "chart.png"),
        Message::user("thanks"),
        Message::assistant_text("anytime"),
    ];

    assert_eq!(safe_split(&msgs, 4), 5);
    assert_eq!(safe_split(&msgs, 3), 5);
    for proposed in 0..=msgs.len() {
        let split = safe_split(&msgs, proposed);
        assert!(split >= proposed);
        assert!(split == msgs.len() || !msgs[split].is_tool(), "split {split}");
    }
}

#[test]
fn summary_counts_omitted_questions() {
    let msgs = alternating(30, 85);
    let config = exact_config(2_000);
    let (out, report) = MemoryManager::new()
        .manage_with_report(msgs.clone(), &config)
        .unwrap();

    assert_eq!(report.stage, Stage::TierSplit);
    let summary = report.summary.unwrap();
    let older = &msgs[..summary.replaced];
    let questions = older.iter().filter(|m| m.role == MessageRole::User).count();
    assert_eq!(questions, 13);
    assert!(
        summary
            .digest
            .contains(&format!("... [{} earlier questions omitted] ...", questions - 5))
    );
    assert!(SummaryMessage::is_summary(&out[0]));
    assert!(report.final_tokens <= config.budget_tokens());
}

#[test]
fn summary_has_no_omission_marker_for_few_questions() {
    let msgs = alternating(12, 400);
    let config = exact_config(3_500);
    let (_, report) = MemoryManager::new()
        .manage_with_report(msgs.clone(), &config)
        .unwrap();

    assert_eq!(report.stage, Stage::TierSplit);
    let summary = report.summary.unwrap();
    let questions = msgs[..summary.replaced]
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .count();
    assert!(questions <= 5);
    assert!(!summary.digest.contains("earlier questions omitted"));
}

// ── Generated histories ──────────────────────────────────────────────

/// Small deterministic PRNG (64-bit LCG) so every run sees the same family.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[(self.next() as usize) % items.len()]
    }
}

struct Case {
    messages: Vec<Message>,
    config: MemoryConfig,
    longest_group: usize,
}

fn generate(seed: u64) -> Case {
    let mut rng = Lcg(seed);
    let mut messages = Vec::new();
    if rng.next() % 4 != 0 {
        messages.push(Message::system("You answer questions about the warehouse."));
    }

    let turns = rng.pick(&[0usize, 1, 3, 8, 20]);
    let mut longest_group = 0;
    let mut call_id = 0;
    for turn in 0..turns {
        let ask = rng.pick(&[5usize, 80, 400, 1_500]);
        messages.push(Message::user(padded("question", turn, ask)));

        let runs = rng.pick(&[0usize, 0, 1, 2]);
        for _ in 0..runs {
            let results = rng.pick(&[1usize, 1, 2, 4, 7]);
            let calls: Vec<ToolCall> = (0..results)
                .map(|k| ToolCall::function(format!("c{call_id}-{k}"), "run_sql", "{}"))
                .collect();
            messages.push(Message::assistant_tool_calls(calls));
            let mut group = 1 + results;
            for k in 0..results {
                // The user may speak before a result arrives.
                if rng.next() % 4 == 0 {
                    messages.push(Message::user(padded("interject", k, 60)));
                    group += 1;
                }
                let size = rng.pick(&[10usize, 500, 6_000, 10_005, 30_000]);
                messages.push(Message::tool_result(
                    format!("c{call_id}-{k}"),
                    "r".repeat(size),
                ));
            }
            longest_group = longest_group.max(group);
            call_id += 1;
        }

        if rng.next() % 3 != 0 {
            let reply = rng.pick(&[5usize, 120, 900]);
            messages.push(Message::assistant_text(padded("finding", turn, reply)));
        }
    }

    let config = MemoryConfig::default()
        .with_max_tokens(rng.pick(&[40usize, 300, 2_000, 9_000, 60_000]))
        .with_short_term_count(rng.pick(&[1usize, 3, 5, 8]))
        .with_reserve_percent(rng.pick(&[0i64, 20, 50]))
        .with_chars_per_token(rng.pick(&[1.0, 3.0, 4.5]));

    Case {
        messages,
        config,
        longest_group,
    }
}

fn cases() -> impl Iterator<Item = Case> {
    (1..=200u64).map(generate)
}

fn non_system(messages: &[Message]) -> &[Message] {
    match messages.first() {
        Some(m) if m.role == MessageRole::System => &messages[1..],
        _ => messages,
    }
}

#[test]
fn generated_family_includes_interjected_turns() {
    let interjected = cases()
        .filter(|case| {
            case.messages
                .windows(2)
                .any(|w| w[0].has_tool_calls() && w[1].role == MessageRole::User)
        })
        .count();
    assert!(interjected > 0);
}

#[test]
fn within_budget_is_a_no_op() {
    let manager = MemoryManager::new();
    for case in cases() {
        let tokens = case.config.estimator().estimate(non_system(&case.messages));
        if tokens > case.config.budget_tokens() {
            continue;
        }
        let out = manager
            .manage_memory(case.messages.clone(), &case.config)
            .unwrap();
        assert_eq!(out, case.messages);
    }
}

#[test]
fn output_keeps_tool_results_paired() {
    let manager = MemoryManager::new();
    for (i, case) in cases().enumerate() {
        assert!(is_well_paired(&case.messages));
        let out = manager.manage_memory(case.messages, &case.config).unwrap();
        assert!(is_well_paired(&out), "case {i}: {out:#?}");
    }
}

#[test]
fn system_message_survives_every_stage() {
    let manager = MemoryManager::new();
    for case in cases() {
        let first = case.messages.first().cloned();
        let out = manager.manage_memory(case.messages, &case.config).unwrap();
        match first {
            Some(sys) if sys.role == MessageRole::System => {
                assert_eq!(out.first(), Some(&sys));
                assert_eq!(
                    out.iter().filter(|m| m.role == MessageRole::System).count(),
                    1
                );
            }
            _ => assert!(out.iter().all(|m| m.role != MessageRole::System)),
        }
    }
}

#[test]
fn estimates_never_grow_between_stages() {
    let manager = MemoryManager::new();
    for (i, case) in cases().enumerate() {
        let (_, report) = manager
            .manage_with_report(case.messages, &case.config)
            .unwrap();
        let tokens: Vec<usize> = report.stage_tokens.iter().map(|(_, t)| *t).collect();
        assert!(
            tokens.windows(2).all(|w| w[1] <= w[0]),
            "case {i}: {:?}",
            report.stage_tokens
        );
        assert!(report.final_tokens <= report.original_tokens);
    }
}

#[test]
fn compacted_output_length_is_bounded() {
    let manager = MemoryManager::new();
    for (i, case) in cases().enumerate() {
        let short_term = case.config.short_term_count;
        let (out, report) = manager
            .manage_with_report(case.messages, &case.config)
            .unwrap();
        let len = non_system(&out).len();
        match report.stage {
            Stage::TierSplit => assert!(len <= short_term.max(4) + 1, "case {i}: {len}"),
            // The floor window can widen back to the start of one tool group.
            Stage::Floor => assert!(len <= 4 + case.longest_group, "case {i}: {len}"),
            _ => {}
        }
    }
}

#[test]
fn state_round_trips_generated_histories() {
    for case in cases() {
        let json = serialize_state(&case.messages).unwrap();
        assert_eq!(deserialize_state(&json).unwrap(), case.messages);
    }
}

// ── Persistence ──────────────────────────────────────────────────────

#[derive(Default)]
struct CountingStore {
    calls: Mutex<Vec<(String, String)>>,
}

impl MidTermStore for CountingStore {
    fn add_mid_term_entry(&self, session_id: &str, text: &str) -> Result<(), String> {
        self.calls
            .lock()
            .map_err(|e| e.to_string())?
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct BrokenStore;

impl MidTermStore for BrokenStore {
    fn add_mid_term_entry(&self, _: &str, _: &str) -> Result<(), String> {
        Err("disk full".into())
    }
}

#[test]
fn summary_is_persisted_exactly_once() {
    let store = Arc::new(CountingStore::default());
    let manager =
        MemoryManager::new().with_persistence(PersistenceBridge::new(store.clone(), "th-7"));

    let (_, report) = manager
        .manage_with_report(alternating(30, 85), &exact_config(2_000))
        .unwrap();

    let calls = store.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "th-7");
    assert_eq!(calls[0].1, report.summary.unwrap().digest);
}

#[test]
fn nothing_is_persisted_without_a_summary() {
    let store = Arc::new(CountingStore::default());
    let manager =
        MemoryManager::new().with_persistence(PersistenceBridge::new(store.clone(), "th-7"));

    manager
        .manage_memory(big_payload_history(), &MemoryConfig::default().with_max_tokens(5_000))
        .unwrap();
    assert!(store.calls.lock().unwrap().is_empty());
}

#[test]
fn failing_store_does_not_change_output() {
    let msgs = alternating(30, 85);
    let config = exact_config(2_000);

    let plain = MemoryManager::new()
        .manage_memory(msgs.clone(), &config)
        .unwrap();
    let broken = MemoryManager::new()
        .with_persistence(PersistenceBridge::new(Arc::new(BrokenStore), "th-7"))
        .manage_memory(msgs, &config)
        .unwrap();
    assert_eq!(plain, broken);
}

#[test]
fn file_store_receives_summary() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileMidTermStore::new(dir.path()).unwrap());
    let manager =
        MemoryManager::new().with_persistence(PersistenceBridge::new(store.clone(), "th-file"));

    let memory = Arc::new(InMemoryMidTermStore::new());
    let mirror =
        MemoryManager::new().with_persistence(PersistenceBridge::new(memory.clone(), "th-file"));

    manager
        .manage_memory(alternating(30, 85), &exact_config(2_000))
        .unwrap();
    mirror
        .manage_memory(alternating(30, 85), &exact_config(2_000))
        .unwrap();

    let entries = store.entries("th-file").unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(vec![entries[0].text.clone()], memory.entries("th-file"));
}
