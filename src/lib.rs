//! Wear Notify - 把手机通知转发到可穿戴设备

pub mod config;
pub mod notification;

pub use config::{DeliveryMode, GlobalSettings, JsonSettingsStore, SettingsStore, SourceSettings, StaticSettings};
pub use notification::{
    DeliveryPipeline, Disposition, Notification, PipelineBuilder, PipelineService, ServiceHandle, SourceKey,
};
