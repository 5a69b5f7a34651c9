//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量处理器
//! - 管理一次运行的生命周期（初始化、运行、统计）
//! - 章节发现与用户选择
//! - 整本 / 分卷两种处理方式
//! - 输出全局统计信息
//!
//! ### `acquisition` - 章节获取编排器
//! - 断点续传：读取进度、跳过已完成章节
//! - 区分限流、软失败和致命错误
//! - 限流章节延后重试，连续限流时提前结束
//! - 在每个失败点保存进度
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<卷>)
//!     ↓
//! workflow::BatchFlow (处理一批章节：获取 → 组装 → 清理)
//!     ↓
//! acquisition (处理 Vec<UnitRef>)
//!     ↓
//! services (能力层：fetch / progress / discovery / assemble)
//!     ↓
//! infrastructure (基础设施：JsExecutor、BrowserSession)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管批次，acquisition 管章节
//! 2. **资源隔离**：浏览器只在单次获取期间存在，不跨章节持有
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **失败不外抛**：单章失败只计数，由调用方决定是否使用部分内容

pub mod acquisition;
pub mod batch_processor;

// 重新导出主要类型
pub use acquisition::{AcquisitionOrchestrator, AcquisitionReport, AcquisitionSettings};
pub use batch_processor::{list_sessions, process_batches, App, BatchMode, Operator, RunSummary};
