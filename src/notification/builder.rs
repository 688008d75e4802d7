//! 流水线构建器 - 未指定的协作方使用 `Unattached` 默认实现

use std::sync::Arc;
use tracing::info;

use super::channel::{
    Attachments, CompanionState, DeviceEnvironment, GroupDismissal, HistoryStore, NativeDelivery, Transport,
    Unattached,
};
use super::clock::{Clock, SystemClock};
use super::pipeline::{Collaborators, DeliveryPipeline};
use crate::config::{SettingsStore, StaticSettings};

/// 流水线构建器
pub struct PipelineBuilder {
    settings: Arc<dyn SettingsStore>,
    transport: Arc<dyn Transport>,
    companion: Arc<dyn CompanionState>,
    environment: Arc<dyn DeviceEnvironment>,
    groups: Arc<dyn GroupDismissal>,
    attachments: Arc<dyn Attachments>,
    native: Arc<dyn NativeDelivery>,
    history: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            settings: Arc::new(StaticSettings::default()),
            transport: Arc::new(Unattached),
            companion: Arc::new(Unattached),
            environment: Arc::new(Unattached),
            groups: Arc::new(Unattached),
            attachments: Arc::new(Unattached),
            native: Arc::new(Unattached),
            history: Arc::new(Unattached),
            clock: Arc::new(SystemClock),
        }
    }

    /// 设置存储
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    /// 传输层
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn companion(mut self, companion: Arc<dyn CompanionState>) -> Self {
        self.companion = companion;
        self
    }

    /// 手机本地环境（屏幕、响铃、勿扰）
    pub fn environment(mut self, environment: Arc<dyn DeviceEnvironment>) -> Self {
        self.environment = environment;
        self
    }

    pub fn groups(mut self, groups: Arc<dyn GroupDismissal>) -> Self {
        self.groups = groups;
        self
    }

    pub fn attachments(mut self, attachments: Arc<dyn Attachments>) -> Self {
        self.attachments = attachments;
        self
    }

    /// 原生通知通道
    pub fn native(mut self, native: Arc<dyn NativeDelivery>) -> Self {
        self.native = native;
        self
    }

    /// 历史存储
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = history;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> DeliveryPipeline {
        let capabilities = self.transport.capabilities();
        info!(
            color = capabilities.color,
            max_message_size = capabilities.max_message_size,
            "Building notification pipeline"
        );

        DeliveryPipeline::new(Collaborators {
            settings: self.settings,
            transport: self.transport,
            companion: self.companion,
            environment: self.environment,
            groups: self.groups,
            attachments: self.attachments,
            native: self.native,
            history: self.history,
            clock: self.clock,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
