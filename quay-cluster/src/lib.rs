//! Container close and pipeline teardown for an in-process storage cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       MiniCluster                             │
//! │                                                               │
//! │  ┌──────────────────────┐        ┌──────────────────────────┐ │
//! │  │ LifecycleCoordinator │──cmd──►│ StorageContainerManager  │ │
//! │  └──────────┬───────────┘        │ ContainerManager         │ │
//! │             │ poll               │ PipelineManager          │ │
//! │             │                    └──────┬─────────────▲─────┘ │
//! │             │                  commands │             │reports│
//! │  ┌──────────▼─────────────────────────▼─┴─────────────┴────┐  │
//! │  │  Datanode 1          Datanode 2          Datanode 3      │  │
//! │  │  ContainerSet        ContainerSet        ContainerSet    │  │
//! │  │  GroupTable          GroupTable          GroupTable      │  │
//! │  └──────────────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use quay_cluster::{ClusterConfig, MiniCluster};
//!
//! let cluster = MiniCluster::start(ClusterConfig::default()).await?;
//! let container = cluster.client().create_and_write(b"data").await?;
//!
//! cluster.coordinator().wait_for_container_close(&[container]).await?;
//! cluster.coordinator().wait_for_pipeline_close(&[container], true).await?;
//!
//! cluster.shutdown().await;
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod datanode;
pub mod dispatch;
pub mod mini_cluster;
pub mod report;
pub mod scm;

// Re-export main types
pub use client::WriteClient;
pub use command::DatanodeCommand;
pub use config::{ClusterConfig, DatanodeConfig, ScmConfig, WaitConfig};
pub use coordinator::LifecycleCoordinator;
pub use datanode::Datanode;
pub use dispatch::{CommandTransport, InProcessTransport};
pub use mini_cluster::MiniCluster;
pub use report::DatanodeReport;
pub use scm::{ContainerInfo, PipelineInfo, StorageContainerManager};
