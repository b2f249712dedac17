//! # finsight
//!
//! A financial document analysis backend. A submitted PDF runs through a
//! fixed pipeline of four LLM analysts (verification, financial analysis,
//! investment recommendation, risk assessment). A final synthesis call then
//! merges their outputs into one report, which is stored on the job.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐   ┌────────────┐
//! │  Loader  │──▶│   Pipeline   │──▶│ Synthesizer│──▶│  JobStore  │
//! │ PDF text │   │ 4 stages     │   │ report     │   │ SQLite/mem │
//! └──────────┘   └──────┬───────┘   └────────────┘   └─────┬──────┘
//!                       │ capabilities                     │
//!                       ▼                                  ▼
//!                ┌──────────────┐              ┌──────────────────────┐
//!                │ read/search/ │              │ CLI · HTTP · workers │
//!                │ frame        │              └──────────────────────┘
//!                └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! finsight init
//! finsight analyze ./reports/q2.pdf --query "Is the margin trend sustainable?"
//! finsight serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Jobs, stage outputs, JSON views |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Per-page PDF text extraction |
//! | [`loader`] | Page prioritization, filtering, truncation, cache |
//! | [`llm`] | Generation backend and retry policy |
//! | [`search`] | Web search providers |
//! | [`capabilities`] | Named operations available to stages |
//! | [`stages`] | The four stage definitions and prompt rendering |
//! | [`policy`] | Removal of untraceable sources from outputs |
//! | [`pipeline`] | Sequential stage execution |
//! | [`synthesis`] | Final report and fallback |
//! | [`jobs`] | Job lifecycle manager |
//! | [`store`] | Job persistence |
//! | [`queue`] | Worker pool and external workers |
//! | [`storage`] | Staged document files |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod capabilities;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod queue;
pub mod search;
pub mod server;
pub mod stages;
pub mod storage;
pub mod store;
pub mod synthesis;
