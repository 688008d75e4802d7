//! 投递流水线端到端测试 - 记录传输层 + 手动时钟

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wear_notify::notification::packet::{Step, KEY_ID, KEY_PAYLOAD, KEY_PREV_ID, KEY_STEP};
use wear_notify::notification::record::TextPayload;
use wear_notify::notification::{
    Attachments, Capabilities, DeliveryRecord, DescriptorHeader, GroupDismissal, GroupRole, ManualClock,
    PacketDictionary, RecordingTransport, SourceKey,
};
use wear_notify::{
    DeliveryPipeline, Disposition, JsonSettingsStore, Notification, PipelineBuilder, SourceSettings, StaticSettings,
};

struct Rig {
    pipeline: DeliveryPipeline,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn rig(settings: SourceSettings) -> Rig {
    rig_with(PipelineBuilder::new(), settings, Capabilities::default())
}

fn rig_with(builder: PipelineBuilder, settings: SourceSettings, capabilities: Capabilities) -> Rig {
    let transport = Arc::new(RecordingTransport::new(capabilities));
    let clock = Arc::new(ManualClock::new(noon()));
    let pipeline = builder
        .settings(Arc::new(StaticSettings::new(settings)))
        .transport(transport.clone())
        .clock(clock.clone())
        .build();
    Rig {
        pipeline,
        transport,
        clock,
    }
}

fn chat(title: &str, body: &str) -> Notification {
    Notification::new(SourceKey::new("com.chat"), title, body)
}

fn step_of(packet: &PacketDictionary) -> i64 {
    packet.get_int(KEY_STEP).unwrap()
}

fn id_of(packet: &PacketDictionary) -> i32 {
    packet.get_int(KEY_ID).unwrap() as i32
}

/// 驱动传输直到空闲，描述包立即确认，返回所有发出的包
fn deliver_all(rig: &mut Rig) -> Vec<PacketDictionary> {
    let mut all = Vec::new();
    loop {
        let progressed = rig.pipeline.notify_transfer_ready();
        let sent = rig.transport.take_sent();
        for packet in &sent {
            if step_of(packet) == Step::Initial as i64 {
                rig.pipeline.on_device_confirmation(id_of(packet));
            }
        }
        all.extend(sent);
        if !progressed {
            return all;
        }
    }
}

#[test]
fn test_chunks_reassemble_to_declared_length() {
    // Given: 正文较长且包含多字节字符
    let mut rig = rig(SourceSettings::default());
    let body = "会议纪要：".repeat(40) + &"x".repeat(90);
    rig.pipeline.process_notification(chat("Notes", &body));

    // When: 完整传输
    let packets = deliver_all(&mut rig);

    // Then: 分块拼接后等于截断后的文本，长度等于描述包中的文本长度
    let descriptor = &packets[0];
    assert_eq!(step_of(descriptor), Step::Initial as i64);
    let (header, _) = DescriptorHeader::parse(descriptor.get_bytes(KEY_PAYLOAD).unwrap()).unwrap();

    let joined: Vec<u8> = packets
        .iter()
        .filter(|p| step_of(p) == Step::TextChunk as i64)
        .flat_map(|p| p.get_bytes(KEY_PAYLOAD).unwrap().to_vec())
        .collect();
    let expected = TextPayload::build("Notes", "", &body, 2000);

    assert_eq!(joined, expected.bytes);
    assert_eq!(joined.len(), header.text_length as usize);
    assert_eq!(header.subtitle_offset, expected.subtitle_offset);
    assert_eq!(header.body_offset, expected.body_offset);
    assert!(!rig.pipeline.has_pending_work());
}

#[test]
fn test_text_truncated_to_configured_length() {
    let settings = SourceSettings {
        maximum_text_length: "20".to_string(),
        ..SourceSettings::default()
    };
    let mut rig = rig(settings);
    rig.pipeline.process_notification(chat("Title", &"y".repeat(100)));

    let packets = deliver_all(&mut rig);
    let text: Vec<u8> = packets
        .iter()
        .filter(|p| step_of(p) == Step::TextChunk as i64)
        .flat_map(|p| p.get_bytes(KEY_PAYLOAD).unwrap().to_vec())
        .collect();

    assert_eq!(text.len(), 20);
    assert!(text.ends_with(b"..."));
}

#[test]
fn test_records_delivered_one_at_a_time() {
    let mut rig = rig(SourceSettings::default());
    for i in 0..5 {
        rig.pipeline.process_notification(chat("Chat", &format!("message {}", i)));
    }

    // 每轮最多一条记录处于传输中，描述包按提交顺序发出
    let mut confirmed = Vec::new();
    for _ in 0..200 {
        let queue = rig.pipeline.queue();
        assert!(queue.pending_len() + usize::from(queue.current().is_some()) <= 5 - confirmed.len().saturating_sub(1));

        let progressed = rig.pipeline.notify_transfer_ready();
        for packet in rig.transport.take_sent() {
            if step_of(&packet) == Step::Initial as i64 {
                confirmed.push(id_of(&packet));
                rig.pipeline.on_device_confirmation(id_of(&packet));
            }
        }
        if !progressed {
            break;
        }
    }

    assert_eq!(confirmed.len(), 5);
    let expected: Vec<i32> = rig.pipeline.outstanding().iter().map(|e| e.id).collect();
    assert_eq!(confirmed.len(), expected.len());
    assert!(!rig.pipeline.has_pending_work());
}

#[test]
fn test_stale_confirmation_clears_awaiting_flags() {
    // Given: 两条通知，第一条的描述包已发出
    let mut rig = rig(SourceSettings::default());
    rig.pipeline.process_notification(chat("A", "one"));
    rig.pipeline.process_notification(chat("B", "two"));
    assert!(rig.pipeline.notify_transfer_ready());
    assert!(rig.pipeline.queue().head().unwrap().awaiting_confirmation);

    // When: 设备确认一个从未分配的 ID（0-9 为保留 ID）
    rig.pipeline.on_device_confirmation(5);

    // Then: 所有等待标记被清除，描述包会重新发送
    assert!(rig.pipeline.queue().pending().all(|r| !r.awaiting_confirmation));
    rig.transport.take_sent();
    assert!(rig.pipeline.notify_transfer_ready());
    assert_eq!(step_of(&rig.transport.take_sent()[0]), Step::Initial as i64);
}

#[test]
fn test_mute_expires_with_clock() {
    let mut rig = rig(SourceSettings::default());
    rig.pipeline.mute_source_until("com.chat", noon() + Duration::minutes(10));

    assert_eq!(rig.pipeline.process_notification(chat("A", "muted")), Disposition::Ignore);
    assert_eq!(rig.pipeline.policy().mute_count(), 1);

    rig.clock.advance(Duration::minutes(11));
    assert_eq!(rig.pipeline.process_notification(chat("A", "back")), Disposition::Send);
    assert_eq!(rig.pipeline.policy().mute_count(), 0);
}

#[test]
fn test_wrapping_quiet_time() {
    let settings = SourceSettings {
        quiet_time_enabled: true,
        quiet_time_start_hour: 22,
        quiet_time_end_hour: 6,
        ..SourceSettings::default()
    };
    let mut rig = rig(settings);

    let at = |h: u32, m: u32| Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap();
    let cases = [
        (at(22, 0), Disposition::HistoryOnly),
        (at(23, 30), Disposition::HistoryOnly),
        (at(3, 0), Disposition::HistoryOnly),
        (at(6, 0), Disposition::HistoryOnly),
        (at(6, 1), Disposition::Send),
        (at(12, 0), Disposition::Send),
        (at(21, 59), Disposition::Send),
    ];

    for (i, (time, expected)) in cases.iter().enumerate() {
        rig.clock.set(*time);
        let disposition = rig.pipeline.process_notification(chat("Chat", &format!("case {}", i)));
        assert_eq!(disposition, *expected, "at {}", time);
    }
}

#[test]
fn test_vibration_suppressed_within_minimum_interval() {
    // Given: 最小振动间隔 60 秒，上一次振动在 10 秒前
    let settings = SourceSettings {
        minimum_vibration_interval: "60".to_string(),
        ..SourceSettings::default()
    };
    let mut rig = rig(settings);
    rig.pipeline.process_notification(chat("A", "first"));
    deliver_all(&mut rig);
    assert_eq!(rig.pipeline.policy().last_vibration("com.chat"), Some(noon()));

    rig.clock.advance(Duration::seconds(10));
    rig.pipeline.process_notification(chat("A", "second"));

    // When
    assert!(rig.pipeline.notify_transfer_ready());

    // Then: 振动模式为 [0, 0]，记录未标记振动
    let descriptor = rig.transport.take_sent().remove(0);
    let (_, vibration) = DescriptorHeader::parse(descriptor.get_bytes(KEY_PAYLOAD).unwrap()).unwrap();
    assert_eq!(vibration, vec![0, 0]);
    assert!(!rig.pipeline.queue().head().unwrap().vibrated);

    deliver_all(&mut rig);
    assert_eq!(rig.pipeline.policy().last_vibration("com.chat"), Some(noon()));
    assert_eq!(
        rig.pipeline.policy().last_notification("com.chat"),
        Some(noon() + Duration::seconds(10))
    );
}

#[test]
fn test_minimum_notification_interval() {
    let settings = SourceSettings {
        minimum_notification_interval: "30".to_string(),
        ..SourceSettings::default()
    };
    let mut rig = rig(settings);
    rig.pipeline.process_notification(chat("A", "first"));
    deliver_all(&mut rig);

    rig.clock.advance(Duration::seconds(10));
    assert_eq!(rig.pipeline.process_notification(chat("A", "second")), Disposition::HistoryOnly);

    rig.clock.advance(Duration::seconds(30));
    assert_eq!(rig.pipeline.process_notification(chat("A", "third")), Disposition::Send);
}

#[test]
fn test_identical_group_member_kept_temporary() {
    let mut rig = rig(SourceSettings::default());
    let member = || chat("Team", "standup in 5").with_group("team", GroupRole::Member);

    assert_eq!(rig.pipeline.process_notification(member()), Disposition::Send);
    assert_eq!(rig.pipeline.process_notification(member()), Disposition::KeepTemporary);
    assert_eq!(rig.pipeline.outstanding().len(), 2);
    assert_eq!(rig.pipeline.queue().pending_len(), 1);
}

#[test]
fn test_inclusion_regex_scenario() {
    let settings = SourceSettings {
        included_regex: vec!["urgent".to_string()],
        ..SourceSettings::default()
    };
    let mut rig = rig(settings);
    assert_eq!(
        rig.pipeline.process_notification(chat("Calendar", "meeting reminder")),
        Disposition::KeepTemporary
    );
    assert_eq!(
        rig.pipeline.process_notification(chat("Calendar", "urgent: server down")),
        Disposition::Send
    );
}

#[test]
fn test_reopen_restarts_from_front() {
    let mut rig = rig(SourceSettings::default());
    rig.pipeline.process_notification(chat("A", &"a".repeat(300)));
    rig.pipeline.process_notification(chat("B", "b"));

    rig.pipeline.notify_transfer_ready();
    let first = id_of(&rig.transport.take_sent()[0]);
    rig.pipeline.on_device_confirmation(first);
    rig.pipeline.notify_transfer_ready();
    rig.transport.take_sent();

    rig.pipeline.on_companion_app_reopened();
    assert!(rig.pipeline.queue().current().is_none());
    assert_eq!(rig.pipeline.queue().head().unwrap().id, first);
    assert!(rig.transport.take_advance_request());

    let packets = deliver_all(&mut rig);
    let descriptors: Vec<i32> = packets
        .iter()
        .filter(|p| step_of(p) == Step::Initial as i64)
        .map(id_of)
        .collect();
    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0], first);
    assert!(!rig.pipeline.has_pending_work());
}

#[derive(Default)]
struct Superseding {
    dismissed: AtomicUsize,
}

impl GroupDismissal for Superseding {
    fn find_superseded_id(&self, _key: &SourceKey) -> i32 {
        77
    }

    fn dismiss_group_siblings(&self, _record: &DeliveryRecord) {
        self.dismissed.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_prev_id_only_with_no_update_vibration() {
    let groups = Arc::new(Superseding::default());

    let mut plain = rig_with(
        PipelineBuilder::new().groups(groups.clone()),
        SourceSettings::default(),
        Capabilities::default(),
    );
    plain.pipeline.process_notification(chat("A", "b"));
    plain.pipeline.notify_transfer_ready();
    assert_eq!(plain.transport.take_sent()[0].get_int(KEY_PREV_ID), Some(0));

    let settings = SourceSettings {
        no_update_vibration: true,
        ..SourceSettings::default()
    };
    let mut updating = rig_with(PipelineBuilder::new().groups(groups.clone()), settings, Capabilities::default());
    updating.pipeline.process_notification(chat("A", "b"));
    updating.pipeline.notify_transfer_ready();
    assert_eq!(updating.transport.take_sent()[0].get_int(KEY_PREV_ID), Some(77));

    assert_eq!(groups.dismissed.load(Ordering::SeqCst), 2);
}

#[derive(Default)]
struct ImageLog {
    transfers: Mutex<Vec<(i32, usize)>>,
}

impl Attachments for ImageLog {
    fn prepare_icon(&self, raw: &[u8], _capabilities: &Capabilities) -> Option<Vec<u8>> {
        Some(raw.to_vec())
    }

    fn prepare_background(&self, raw: &[u8], capabilities: &Capabilities) -> Option<Vec<u8>> {
        capabilities.color.then(|| raw.to_vec())
    }

    fn start_image_transfer(&self, id: i32, background_len: usize) {
        self.transfers.lock().unwrap().push((id, background_len));
    }
}

#[test]
fn test_background_image_on_color_device() {
    let images = Arc::new(ImageLog::default());
    let capabilities = Capabilities {
        color: true,
        max_message_size: 256,
    };
    let mut rig = rig_with(
        PipelineBuilder::new().attachments(images.clone()),
        SourceSettings::default(),
        capabilities,
    );

    let mut notification = chat("Photo", "from Bob");
    notification.background_image = Some(vec![0xAB; 1000]);
    notification.color = 0xFF00_00FF;
    rig.pipeline.process_notification(notification);

    let packets = deliver_all(&mut rig);
    let (header, _) = DescriptorHeader::parse(packets[0].get_bytes(KEY_PAYLOAD).unwrap()).unwrap();
    assert_eq!(header.background_len, 1000);
    assert_eq!(header.color, 0b1100_0011);
    assert_eq!(*images.transfers.lock().unwrap(), vec![(id_of(&packets[0]), 1000)]);
}

#[test]
fn test_monochrome_device_omits_color_and_background() {
    let images = Arc::new(ImageLog::default());
    let mut rig = rig_with(
        PipelineBuilder::new().attachments(images.clone()),
        SourceSettings::default(),
        Capabilities::default(),
    );

    let mut notification = chat("Photo", "from Bob");
    notification.background_image = Some(vec![0xAB; 1000]);
    notification.color = 0xFF00_00FF;
    rig.pipeline.process_notification(notification);

    let packets = deliver_all(&mut rig);
    let (header, _) = DescriptorHeader::parse(packets[0].get_bytes(KEY_PAYLOAD).unwrap()).unwrap();
    assert_eq!(header.background_len, 0);
    assert_eq!(header.color, 0);
    assert!(images.transfers.lock().unwrap().is_empty());
}

#[test]
fn test_out_of_range_intervals_do_not_stall_delivery() {
    // Given: 设置文件中的间隔超出 32 位范围
    let settings = SourceSettings {
        minimum_notification_interval: "10000000000000000".to_string(),
        minimum_vibration_interval: "10000000000000000".to_string(),
        ..SourceSettings::default()
    };
    let mut rig = rig(settings);
    rig.pipeline.process_notification(chat("A", "first"));
    deliver_all(&mut rig);

    // When: 同一来源的第二条通知
    rig.clock.advance(Duration::seconds(1));
    assert_eq!(rig.pipeline.process_notification(chat("A", "second")), Disposition::Send);
    assert!(rig.pipeline.notify_transfer_ready());

    // Then: 按未配置间隔处理，照常振动
    let descriptor = rig.transport.take_sent().remove(0);
    let (_, vibration) = DescriptorHeader::parse(descriptor.get_bytes(KEY_PAYLOAD).unwrap()).unwrap();
    assert_eq!(vibration, 500u16.to_le_bytes().to_vec());
}

#[test]
fn test_out_of_range_quiet_hours_from_settings_file() {
    let store = JsonSettingsStore::parse(
        r#"{"default": {"quiet_time_enabled": true, "quiet_time_start_hour": 4294967295, "quiet_time_end_hour": 6}}"#,
    )
    .unwrap();
    let transport = Arc::new(RecordingTransport::new(Capabilities::default()));
    let clock = Arc::new(ManualClock::new(noon()));
    let mut pipeline = PipelineBuilder::new()
        .settings(Arc::new(store))
        .transport(transport)
        .clock(clock.clone())
        .build();

    // 起点截断为 23:00，静默时段为 23:00-06:00
    assert_eq!(pipeline.process_notification(chat("A", "noon")), Disposition::Send);
    clock.set(Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap());
    assert_eq!(pipeline.process_notification(chat("A", "night")), Disposition::HistoryOnly);
}
