//! Numbered schema migrations. The applied count lives in
//! `PRAGMA user_version`; each script runs once, in order, inside its own
//! transaction. Append only — never edit a shipped script.

pub const MIGRATIONS: &[&str] = &[
    // 1: memory chunks with owner/scope columns and an embedding BLOB
    "
    CREATE TABLE memory_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        heading TEXT NOT NULL,
        content TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        embedding BLOB,
        owner TEXT NOT NULL DEFAULT 'shared',
        scope TEXT NOT NULL DEFAULT 'global',
        scope_id TEXT
    );
    CREATE INDEX idx_memory_chunks_source ON memory_chunks(source, owner, scope);
    ",
    // 2: full-text index over heading+content, kept in sync by triggers
    "
    CREATE VIRTUAL TABLE memory_chunks_fts USING fts5(
        heading,
        content,
        content='memory_chunks',
        content_rowid='id'
    );
    CREATE TRIGGER memory_chunks_ai AFTER INSERT ON memory_chunks BEGIN
        INSERT INTO memory_chunks_fts(rowid, heading, content)
        VALUES (new.id, new.heading, new.content);
    END;
    CREATE TRIGGER memory_chunks_ad AFTER DELETE ON memory_chunks BEGIN
        INSERT INTO memory_chunks_fts(memory_chunks_fts, rowid, heading, content)
        VALUES ('delete', old.id, old.heading, old.content);
    END;
    CREATE TRIGGER memory_chunks_au AFTER UPDATE ON memory_chunks BEGIN
        INSERT INTO memory_chunks_fts(memory_chunks_fts, rowid, heading, content)
        VALUES ('delete', old.id, old.heading, old.content);
        INSERT INTO memory_chunks_fts(rowid, heading, content)
        VALUES (new.id, new.heading, new.content);
    END;
    ",
    // 3: execution metrics for the learner
    "
    CREATE TABLE learner_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_excerpt TEXT NOT NULL,
        duration_ms INTEGER NOT NULL,
        iterations INTEGER NOT NULL,
        tool_calls INTEGER NOT NULL,
        tokens_used INTEGER NOT NULL DEFAULT 0,
        outcome TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX idx_learner_created ON learner_records(created_at);
    ",
    // 4: durable scheduler state; runs cascade with their job
    "
    CREATE TABLE cron_jobs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        schedule_kind TEXT NOT NULL,
        schedule_value TEXT NOT NULL,
        timezone TEXT,
        task TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run_at TEXT,
        next_run_at TEXT,
        last_status TEXT,
        last_error TEXT,
        consecutive_errors INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE TABLE cron_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL REFERENCES cron_jobs(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        error TEXT,
        started_at TEXT NOT NULL,
        duration_ms INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX idx_cron_runs_job ON cron_runs(job_id, id DESC);
    ",
];
