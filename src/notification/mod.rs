//! 通知投递流水线 - 把手机通知转发到可穿戴设备
//!
//! # 组成
//! 1. 规范化：`normalizer` 推导标题/副标题/正文
//! 2. 过滤：`filter` 按固定顺序的规则链给出 `Disposition`
//! 3. 传输：`transfer` 以描述包 + 分块的方式发送，设备确认后继续
//! 4. 策略：`policy` 记录每个来源的振动/通知时间与临时静音
//!
//! # 使用示例
//! ```ignore
//! use wear_notify::notification::{PipelineBuilder, PipelineService};
//!
//! let pipeline = PipelineBuilder::new().transport(transport).build();
//! let (service, handle) = PipelineService::new(pipeline);
//! service.spawn();
//! handle.submit(notification);
//! ```

pub mod builder;
pub mod channel;
pub mod clock;
pub mod filter;
pub mod group;
pub mod normalizer;
pub mod outstanding;
pub mod packet;
pub mod pipeline;
pub mod policy;
pub mod queue;
pub mod record;
pub mod service;
pub mod source;
pub mod store;
pub mod transfer;
pub mod vibration;

pub use builder::PipelineBuilder;
pub use channel::{
    Attachments, Capabilities, CompanionState, DeviceEnvironment, GroupDismissal, HistoryStore, NativeDelivery,
    RecordingTransport, Transport, Unattached,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use filter::{decide, Disposition, FilterContext, RingerMode};
pub use outstanding::{OutstandingEntry, OutstandingIndex};
pub use packet::{DescriptorHeader, DeviceMessage, PacketDictionary, Step, TupleValue};
pub use pipeline::{DeliveryPipeline, IntakeHandle};
pub use policy::PolicyStore;
pub use record::{DeliveryRecord, TextPayload, TransferState};
pub use service::{PipelineService, ServiceCommand, ServiceHandle, ServiceStats};
pub use source::{GroupRole, Notification, NotificationAction, NotificationFlags, SourceKey};
pub use store::{HistoryRecord, JsonlHistoryStore};
pub use transfer::{ConfirmOutcome, TransferMachine};
