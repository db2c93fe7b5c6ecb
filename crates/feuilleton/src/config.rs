//! Process configuration.
//!
//! Every option has a default and an environment override named after the
//! field in SCREAMING_SNAKE_CASE. Settings are resolved once at startup and
//! shared behind an `Arc`; nothing re-reads the environment afterwards.

use std::time::Duration;

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|raw| matches!(raw.trim(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_list(name: &str, default: &[&str]) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_else(|| default.iter().map(|item| (*item).to_string()).collect())
}

/// All recognized options, with defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    // Chapter length
    pub chapter_min_words: u32,
    pub chapter_max_words: u32,

    // Prompt truncation budgets
    pub memory_context_max_chars: usize,
    pub story_bible_max_chars: usize,
    pub style_context_max_chars: usize,
    pub rag_context_max_chars: usize,
    pub critic_max_chars: usize,
    pub validation_max_chars: usize,

    // Retrieval
    pub rag_top_k: usize,
    pub rag_chunk_size: usize,
    pub rag_chunk_overlap: usize,
    pub embedding_model: String,
    pub embedding_dimension: usize,

    // Beat generation
    pub write_parallel_beats: bool,
    pub write_distributed_beats: bool,
    pub write_partial_revision: bool,
    pub write_early_stop_ratio: f64,
    pub write_min_beat_words: u32,
    pub write_tokens_per_word: f64,
    pub write_max_tokens: u32,
    pub chat_max_tokens: u32,
    pub write_previous_beats_max_chars: usize,
    pub beat_soft_time_limit: Duration,
    pub beat_hard_time_limit: Duration,
    pub distributed_chapter_timeout: Duration,

    // Quality gate
    pub max_revisions: u32,
    pub quality_gate_score_threshold: f64,
    pub quality_gate_coherence_threshold: f64,

    // Plan reasoning switch
    pub plan_reasoning_enabled: bool,
    pub plan_reasoning_first_chapters: u32,
    pub plan_reasoning_interval: u32,
    pub plan_reasoning_keywords: Vec<String>,

    // Recursive memory pyramid
    pub recursive_memory_recent_chapters: usize,
    pub recursive_memory_arc_summary_words: u32,
    pub recursive_memory_global_synopsis_words: u32,

    // Coherence specialists
    pub character_drift_enabled: bool,
    pub character_drift_threshold: f64,
    pub voice_analyzer_enabled: bool,
    pub voice_consistency_threshold: f64,
    pub voice_min_dialogues_for_analysis: usize,
    pub pov_validator_enabled: bool,
    pub pov_default_type: String,
    pub semantic_validator_enabled: bool,
    pub semantic_conflict_threshold: f64,

    // Maintenance
    pub fact_promotion_threshold: u32,
    pub fact_promotion_schedule_hours: u64,
    pub draft_cleanup_days: i64,
    pub memory_reconcile_diff_threshold: u32,

    // Cache TTLs
    pub memory_context_cache_ttl: Duration,
    pub rag_cache_ttl: Duration,

    // LLM provider
    pub llm_api_base: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_reasoning_model: String,
    pub llm_timeout: Duration,
    pub llm_max_retries: u32,
    pub llm_retry_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chapter_min_words: 800,
            chapter_max_words: 2000,

            memory_context_max_chars: 4000,
            story_bible_max_chars: 2000,
            style_context_max_chars: 1500,
            rag_context_max_chars: 2000,
            critic_max_chars: 6000,
            validation_max_chars: 8000,

            rag_top_k: 5,
            rag_chunk_size: 1000,
            rag_chunk_overlap: 150,
            embedding_model: "paraphrase-multilingual-MiniLM-L12-v2".to_string(),
            embedding_dimension: 384,

            write_parallel_beats: true,
            write_distributed_beats: false,
            write_partial_revision: true,
            write_early_stop_ratio: 1.05,
            write_min_beat_words: 120,
            write_tokens_per_word: 2.0,
            write_max_tokens: 4000,
            chat_max_tokens: 2000,
            write_previous_beats_max_chars: 4000,
            beat_soft_time_limit: Duration::from_secs(90),
            beat_hard_time_limit: Duration::from_secs(120),
            distributed_chapter_timeout: Duration::from_secs(180),

            max_revisions: 2,
            quality_gate_score_threshold: 7.0,
            quality_gate_coherence_threshold: 6.0,

            plan_reasoning_enabled: true,
            plan_reasoning_first_chapters: 3,
            plan_reasoning_interval: 10,
            plan_reasoning_keywords: vec![
                "reflechis".to_string(),
                "raisonne".to_string(),
                "complexe".to_string(),
                "twist".to_string(),
            ],

            recursive_memory_recent_chapters: 5,
            recursive_memory_arc_summary_words: 500,
            recursive_memory_global_synopsis_words: 1000,

            character_drift_enabled: false,
            character_drift_threshold: 0.6,
            voice_analyzer_enabled: false,
            voice_consistency_threshold: 0.55,
            voice_min_dialogues_for_analysis: 5,
            pov_validator_enabled: false,
            pov_default_type: "limited".to_string(),
            semantic_validator_enabled: false,
            semantic_conflict_threshold: 0.75,

            fact_promotion_threshold: 3,
            fact_promotion_schedule_hours: 24,
            draft_cleanup_days: 30,
            memory_reconcile_diff_threshold: 5,

            memory_context_cache_ttl: Duration::from_secs(1800),
            rag_cache_ttl: Duration::from_secs(3600),

            llm_api_base: "https://api.deepseek.com/v1".to_string(),
            llm_api_key: String::new(),
            llm_model: "deepseek-chat".to_string(),
            llm_reasoning_model: "deepseek-reasoner".to_string(),
            llm_timeout: Duration::from_secs(120),
            llm_max_retries: 3,
            llm_retry_backoff: Duration::from_millis(500),
        }
    }
}

impl Settings {
    /// Resolve settings from the environment on top of the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chapter_min_words: env_parse("CHAPTER_MIN_WORDS", defaults.chapter_min_words),
            chapter_max_words: env_parse("CHAPTER_MAX_WORDS", defaults.chapter_max_words),

            memory_context_max_chars: env_parse(
                "MEMORY_CONTEXT_MAX_CHARS",
                defaults.memory_context_max_chars,
            ),
            story_bible_max_chars: env_parse("STORY_BIBLE_MAX_CHARS", defaults.story_bible_max_chars),
            style_context_max_chars: env_parse(
                "STYLE_CONTEXT_MAX_CHARS",
                defaults.style_context_max_chars,
            ),
            rag_context_max_chars: env_parse("RAG_CONTEXT_MAX_CHARS", defaults.rag_context_max_chars),
            critic_max_chars: env_parse("CRITIC_MAX_CHARS", defaults.critic_max_chars),
            validation_max_chars: env_parse("VALIDATION_MAX_CHARS", defaults.validation_max_chars),

            rag_top_k: env_parse("RAG_TOP_K", defaults.rag_top_k),
            rag_chunk_size: env_parse("RAG_CHUNK_SIZE", defaults.rag_chunk_size),
            rag_chunk_overlap: env_parse("RAG_CHUNK_OVERLAP", defaults.rag_chunk_overlap),
            embedding_model: env_string("EMBEDDING_MODEL", &defaults.embedding_model),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", defaults.embedding_dimension),

            write_parallel_beats: env_bool("WRITE_PARALLEL_BEATS", defaults.write_parallel_beats),
            write_distributed_beats: env_bool(
                "WRITE_DISTRIBUTED_BEATS",
                defaults.write_distributed_beats,
            ),
            write_partial_revision: env_bool("WRITE_PARTIAL_REVISION", defaults.write_partial_revision),
            write_early_stop_ratio: env_parse("WRITE_EARLY_STOP_RATIO", defaults.write_early_stop_ratio),
            write_min_beat_words: env_parse("WRITE_MIN_BEAT_WORDS", defaults.write_min_beat_words),
            write_tokens_per_word: env_parse("WRITE_TOKENS_PER_WORD", defaults.write_tokens_per_word),
            write_max_tokens: env_parse("WRITE_MAX_TOKENS", defaults.write_max_tokens),
            chat_max_tokens: env_parse("CHAT_MAX_TOKENS", defaults.chat_max_tokens),
            write_previous_beats_max_chars: env_parse(
                "WRITE_PREVIOUS_BEATS_MAX_CHARS",
                defaults.write_previous_beats_max_chars,
            ),
            beat_soft_time_limit: Duration::from_secs(env_parse("BEAT_SOFT_TIME_LIMIT", 90)),
            beat_hard_time_limit: Duration::from_secs(env_parse("BEAT_HARD_TIME_LIMIT", 120)),
            distributed_chapter_timeout: Duration::from_secs(env_parse(
                "DISTRIBUTED_CHAPTER_TIMEOUT",
                180,
            )),

            max_revisions: env_parse("MAX_REVISIONS", defaults.max_revisions),
            quality_gate_score_threshold: env_parse(
                "QUALITY_GATE_SCORE_THRESHOLD",
                defaults.quality_gate_score_threshold,
            ),
            quality_gate_coherence_threshold: env_parse(
                "QUALITY_GATE_COHERENCE_THRESHOLD",
                defaults.quality_gate_coherence_threshold,
            ),

            plan_reasoning_enabled: env_bool("PLAN_REASONING_ENABLED", defaults.plan_reasoning_enabled),
            plan_reasoning_first_chapters: env_parse(
                "PLAN_REASONING_FIRST_CHAPTERS",
                defaults.plan_reasoning_first_chapters,
            ),
            plan_reasoning_interval: env_parse(
                "PLAN_REASONING_INTERVAL",
                defaults.plan_reasoning_interval,
            ),
            plan_reasoning_keywords: env_list(
                "PLAN_REASONING_KEYWORDS",
                &["reflechis", "raisonne", "complexe", "twist"],
            ),

            recursive_memory_recent_chapters: env_parse(
                "RECURSIVE_MEMORY_RECENT_CHAPTERS",
                defaults.recursive_memory_recent_chapters,
            ),
            recursive_memory_arc_summary_words: env_parse(
                "RECURSIVE_MEMORY_ARC_SUMMARY_WORDS",
                defaults.recursive_memory_arc_summary_words,
            ),
            recursive_memory_global_synopsis_words: env_parse(
                "RECURSIVE_MEMORY_GLOBAL_SYNOPSIS_WORDS",
                defaults.recursive_memory_global_synopsis_words,
            ),

            character_drift_enabled: env_bool("CHARACTER_DRIFT_ENABLED", defaults.character_drift_enabled),
            character_drift_threshold: env_parse(
                "CHARACTER_DRIFT_THRESHOLD",
                defaults.character_drift_threshold,
            ),
            voice_analyzer_enabled: env_bool("VOICE_ANALYZER_ENABLED", defaults.voice_analyzer_enabled),
            voice_consistency_threshold: env_parse(
                "VOICE_CONSISTENCY_THRESHOLD",
                defaults.voice_consistency_threshold,
            ),
            voice_min_dialogues_for_analysis: env_parse(
                "VOICE_MIN_DIALOGUES_FOR_ANALYSIS",
                defaults.voice_min_dialogues_for_analysis,
            ),
            pov_validator_enabled: env_bool("POV_VALIDATOR_ENABLED", defaults.pov_validator_enabled),
            pov_default_type: env_string("POV_DEFAULT_TYPE", &defaults.pov_default_type),
            semantic_validator_enabled: env_bool(
                "SEMANTIC_VALIDATOR_ENABLED",
                defaults.semantic_validator_enabled,
            ),
            semantic_conflict_threshold: env_parse(
                "SEMANTIC_CONFLICT_THRESHOLD",
                defaults.semantic_conflict_threshold,
            ),

            fact_promotion_threshold: env_parse(
                "FACT_PROMOTION_THRESHOLD",
                defaults.fact_promotion_threshold,
            ),
            fact_promotion_schedule_hours: env_parse(
                "FACT_PROMOTION_SCHEDULE_HOURS",
                defaults.fact_promotion_schedule_hours,
            ),
            draft_cleanup_days: env_parse("DRAFT_CLEANUP_DAYS", defaults.draft_cleanup_days),
            memory_reconcile_diff_threshold: env_parse(
                "MEMORY_RECONCILE_DIFF_THRESHOLD",
                defaults.memory_reconcile_diff_threshold,
            ),

            memory_context_cache_ttl: Duration::from_secs(env_parse("MEMORY_CONTEXT_CACHE_TTL", 1800)),
            rag_cache_ttl: Duration::from_secs(env_parse("RAG_CACHE_TTL", 3600)),

            llm_api_base: env_string("LLM_API_BASE", &defaults.llm_api_base),
            llm_api_key: env_string("LLM_API_KEY", ""),
            llm_model: env_string("LLM_MODEL", &defaults.llm_model),
            llm_reasoning_model: env_string("LLM_REASONING_MODEL", &defaults.llm_reasoning_model),
            llm_timeout: Duration::from_secs(env_parse("LLM_TIMEOUT", 120)),
            llm_max_retries: env_parse("LLM_MAX_RETRIES", defaults.llm_max_retries),
            llm_retry_backoff: Duration::from_millis(env_parse("LLM_RETRY_BACKOFF_MS", 500)),
        }
    }

    /// Midpoint of the configured chapter range, used when the caller gives
    /// no target.
    #[must_use]
    pub fn default_target_words(&self) -> u32 {
        (self.chapter_min_words + self.chapter_max_words) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let settings = Settings::default();
        assert!(settings.chapter_min_words < settings.chapter_max_words);
        assert!(settings.rag_chunk_overlap < settings.rag_chunk_size);
        assert!(settings.quality_gate_coherence_threshold <= settings.quality_gate_score_threshold);
        assert_eq!(settings.default_target_words(), 1400);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("FEUILLETON_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse("FEUILLETON_TEST_PARSE", 7u32), 7);
        std::env::remove_var("FEUILLETON_TEST_PARSE");
    }
}
