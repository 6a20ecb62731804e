//! Wiring: build every subsystem from a config snapshot and a provider
//! registry, with the documented degradations when the relational store
//! is unavailable, and drive them under one cancellation token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::AgentLoop;
use crate::bus::MessageBus;
use crate::context::ContextBuilder;
use crate::heartbeat::sync_heartbeat;
use crate::learner::Learner;
use crate::scheduler::Scheduler;
use crate::session::SessionStore;
use crate::summarizer::Summarizer;
use janus_config::JanusConfig;
use janus_core::Result;
use janus_llm::{OllamaEmbedding, ProviderRegistry};
use janus_memory::{MemoryIndex, OWNER_SHARED, SCOPE_GLOBAL, SCOPE_USER};
use janus_skills::SkillCatalog;
use janus_store::Database;
use janus_tools::{Confirmer, Gate, StaticConfirmer, ToolRegistry};

pub struct Runtime {
    pub config: JanusConfig,
    pub bus: Arc<MessageBus>,
    pub agent: Arc<AgentLoop>,
    pub scheduler: Arc<Scheduler>,
    pub memory: Option<Arc<MemoryIndex>>,
}

impl Runtime {
    /// Assemble the runtime. `confirmer` is the channel-provided gate
    /// confirmation service; without one, gated actions are denied.
    pub fn build(
        config: JanusConfig,
        providers: ProviderRegistry,
        confirmer: Option<Arc<dyn Confirmer>>,
    ) -> Result<Self> {
        let providers = Arc::new(providers);
        let bus = Arc::new(MessageBus::new(100));
        let workspace = config.workspace.dir.clone();

        // The relational store, with the documented fallbacks on failure.
        let database = if config.database.enabled {
            let path = if config.database.path.is_absolute() {
                config.database.path.clone()
            } else {
                workspace.join(&config.database.path)
            };
            match Database::open(&path) {
                Ok(db) => Some(db),
                Err(e) => {
                    warn!(error = %e, "database unavailable — memory search disabled, learner and scheduler degraded");
                    None
                }
            }
        } else {
            None
        };

        // Memory index: only with a database; vector branch only when
        // configured (local embedding model).
        let memory = database.clone().map(|db| {
            let mut index = MemoryIndex::new(db);
            if config.memory.vector_search {
                index = index.with_embedder(Arc::new(OllamaEmbedding::new("nomic-embed-text")));
            }
            Arc::new(index)
        });

        if let Some(index) = &memory {
            bootstrap_memory(index, &config);
        }

        // Skill catalog: workspace > user-global.
        let mut skills = SkillCatalog::new(&[
            config.workspace.skills_path().as_path(),
            janus_config::home_base().join("skills").as_path(),
        ]);
        match skills.discover() {
            Ok(loaded) => info!(count = loaded.len(), "loaded skills"),
            Err(e) => warn!(error = %e, "skill discovery failed"),
        }

        let sessions = Arc::new(SessionStore::new(config.workspace.sessions_path()));

        let mut tools = ToolRegistry::with_builtins();
        if config.gates.enabled {
            let confirmer = confirmer.unwrap_or_else(|| Arc::new(StaticConfirmer(false)));
            tools.set_gate(Gate::new(&config.gates.exec_patterns), confirmer);
        }
        let tools = Arc::new(tools);

        let learner = Arc::new(match &database {
            Some(db) => Learner::with_database(db.clone()),
            None => Learner::with_file(workspace.join(".janus").join("learner.jsonl")),
        });

        // The scheduler keeps running without a durable store, it just
        // forgets its jobs on restart.
        let scheduler_db = match &database {
            Some(db) => db.clone(),
            None => Database::open_in_memory()?,
        };
        let scheduler = Arc::new(Scheduler::new(scheduler_db, Arc::clone(&bus)));

        if config.heartbeat.enabled {
            match sync_heartbeat(&scheduler, &workspace.join("HEARTBEAT.md")) {
                Ok(count) if count > 0 => info!(count, "heartbeat tasks scheduled"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "heartbeat sync failed"),
            }
        }

        let mut context = ContextBuilder::new(config.clone(), Arc::new(skills));
        if let Some(index) = &memory {
            context = context.with_memory(Arc::clone(index));
        }
        context = context.with_learner(Arc::clone(&learner));

        let mut summarizer = Summarizer::new(
            Arc::clone(&providers),
            Arc::clone(&sessions),
            config.workspace.memory_path(),
            config.llm.model.clone(),
        );
        if let Some(index) = &memory {
            summarizer = summarizer.with_memory(Arc::clone(index));
        }

        let mut agent = AgentLoop::new(
            config.clone(),
            Arc::clone(&bus),
            providers,
            tools,
            sessions,
            Arc::new(context),
        )
        .with_learner(learner)
        .with_scheduler(Arc::clone(&scheduler))
        .with_summarizer(Arc::new(summarizer));
        if let Some(index) = &memory {
            agent = agent.with_memory(Arc::clone(index));
        }

        info!(
            durable_scheduler = scheduler.is_durable(),
            memory_search = memory.is_some(),
            "runtime assembled"
        );

        Ok(Self {
            config,
            bus,
            agent: Arc::new(agent),
            scheduler,
            memory,
        })
    }

    /// Run dispatcher, scheduler, and agent loop until the token fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let dispatcher = {
            let bus = Arc::clone(&self.bus);
            let cancel = cancel.clone();
            tokio::spawn(async move { bus.run_dispatcher(cancel).await })
        };
        let scheduler = {
            let scheduler = Arc::clone(&self.scheduler);
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        self.agent.run(cancel).await;

        let _ = dispatcher.await;
        let _ = scheduler.await;
        info!("runtime stopped");
    }
}

/// Seed the index so keyword search has content before the first
/// summarizer flush: the workspace memory directory as shared/global rows,
/// and each configured user's `~/.janus/users/<id>/memory/` files as
/// user-scoped rows.
fn bootstrap_memory(index: &MemoryIndex, config: &JanusConfig) {
    let mut indexed = index_dir(index, &config.workspace.memory_path(), OWNER_SHARED, SCOPE_GLOBAL, None);

    let users_base = janus_config::home_base().join("users");
    for user in &config.users {
        indexed += index_dir(
            index,
            &users_base.join(&user.id).join("memory"),
            &user.id,
            SCOPE_USER,
            Some(&user.id),
        );
    }

    if indexed > 0 {
        info!(chunks = indexed, "bootstrapped memory index");
    }
}

fn index_dir(
    index: &MemoryIndex,
    dir: &std::path::Path,
    owner: &str,
    scope: &str,
    scope_id: Option<&str>,
) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut indexed = 0usize;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(".md") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        match index.index_file(name, &content, owner, scope, scope_id) {
            Ok(chunks) => indexed += chunks,
            Err(e) => warn!(file = name, error = %e, "failed to index memory file"),
        }
    }
    indexed
}
