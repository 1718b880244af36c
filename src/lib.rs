//! # Media Harvester
//!
//! Orchestration core of a multi-platform content harvesting service. It
//! accepts harvesting requests, runs them concurrently under a bounded
//! capacity, tracks their progress, merges layered crawl configuration and
//! drives platform login handshakes.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: task lifecycle, admission control, batched execution and progress
//! - **[`config`]**: layered crawl configuration and service settings
//! - **[`login`]**: QR code, phone and cookie login state machine
//! - **[`adapter`]**: platform collector and storage seams, plus in-process implementations
//! - **[`cookies`]**: per-platform cache of authenticated cookies
//!
//! Platform collection and persistence are external collaborators expressed
//! as the [`PlatformAdapter`] and [`StorageAdapter`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use media_harvester::{MockPlatformAdapter, Platform, TaskOrchestrator, TaskRequest};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = TaskOrchestrator::builder()
//!         .adapter(Arc::new(MockPlatformAdapter::new(Platform::Xhs)))
//!         .build();
//!
//!     let request = TaskRequest::search("xhs", ["美食"]).with_max_count(50);
//!     let task_id = orchestrator.create_task(request).await?;
//!
//!     let snapshot = orchestrator
//!         .wait_for_completion(task_id, Duration::from_secs(120))
//!         .await?;
//!     println!("task {} is {}", task_id, snapshot.status);
//!     Ok(())
//! }
//! ```

/// Collector and storage traits with in-process implementations.
pub mod adapter;

/// Layered crawl configuration, validation and service settings.
///
/// Built-in defaults, platform defaults, environment overrides and request
/// overrides are merged field by field into one frozen configuration.
pub mod config;

/// Per-platform cookie cache.
pub mod cookies;

/// Environment constants and path utilities.
pub mod env;

/// Error taxonomy shared across the crate.
pub mod error;

/// Login session state machine and manager.
pub mod login;

/// Harvesting task orchestration.
///
/// Tasks are admitted under a concurrency ceiling, queued FIFO otherwise,
/// and executed in bounded batches by one worker each.
pub mod task;

// CLI module for the operator binary
pub mod cli;

// Re-export collaborator seams
pub use adapter::{
    AdapterRegistry, MemoryStorage, MockPlatformAdapter, PlatformAdapter, StorageAdapter,
};

// Re-export configuration types
pub use config::{
    ConfigLayer, ConfigResolver, CrawlerConfig, Platform, ServiceSettings, SettingsDiscovery,
    TaskType,
};

pub use cookies::CookieCache;
pub use error::{AdapterError, HarvestError, Result, StorageError, ValidationErrors};

// Re-export login types
pub use login::{LoginRequest, LoginSession, LoginSessionManager, LoginSignal, LoginState, LoginType};

// Re-export task types
pub use task::{
    OrchestratorConfig, TaskOrchestrator, TaskOutcome, TaskRequest, TaskResult, TaskSnapshot,
    TaskStatus,
};
