//! # Ranobe EPUB
//!
//! 从限流严重的连载站点获取小说章节，断点续传，并生成 EPUB 电子书
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `JsExecutor` - 唯一的 page owner，提供 eval() / 状态码 / 点击能力
//! - `browser/` - 每次获取启动一个浏览器，用完立即释放
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个章节或单本书
//! - `ContentFetcher` - 单章获取与重试退避
//! - `ProgressStore` - 进度文件读写
//! - `UnitDiscovery` - API / 页面扫描两种章节发现方式
//! - `partitioner` - 分卷与选择
//! - `ArtifactAssembler` - 完整 / 无图两级组装
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一批章节"的完整处理流程
//! - `SessionContext` - 上下文封装（书籍 + 卷），创建后不可变
//! - `BatchFlow` - 流程编排（获取 → 完整性检查 → 组装 → 清理进度）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/acquisition` - 章节获取编排器，处理限流和断点续传
//! - `orchestrator/batch_processor` - 整次运行：发现 → 选择 → 分批 → 统计
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{launch_browser, BrowserOptions, BrowserSession};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::JsExecutor;
pub use models::{BookMetadata, UnitContent, UnitRef};
pub use orchestrator::{AcquisitionOrchestrator, AcquisitionReport, App};
pub use workflow::{BatchFlow, SessionContext};
