//! Device loading and transport creation

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use tracing_test::traced_test;

use rvoip_sfu_client::{
    Device, DeviceConfig, EngineVariant, MediaKind, ProducerDefaults, RtpCapabilities, TransportDirection,
    TransportOptions,
};

use common::{loaded_device, router_rtp_capabilities, transport_options, FakeEngineFactory, FakeSignaling};

#[tokio::test]
async fn test_load_negotiates_capabilities() {
    let (device, _factory) = loaded_device(EngineVariant::UnifiedPlan).await;

    assert!(device.loaded());
    assert!(assert_ok!(device.can_produce("audio")));
    assert!(assert_ok!(device.can_produce("video")));
    assert!(assert_ok!(device.can_produce_kind(MediaKind::Video)));

    let caps = assert_ok!(device.rtp_capabilities());
    let payload_types: Vec<_> = caps.codecs.iter().map(|c| c.preferred_payload_type).collect();
    assert_eq!(payload_types, vec![Some(100), Some(101), Some(102)]);

    let extended = assert_ok!(device.extended_rtp_capabilities());
    assert_eq!(extended.codecs.len(), 2);
    assert_eq!(extended.codecs[1].local_rtx_payload_type, Some(97));
    assert_eq!(extended.codecs[1].remote_rtx_payload_type, Some(102));

    let sctp = assert_ok!(device.sctp_capabilities());
    assert_eq!(sctp.num_streams.os, 1024);
}

#[tokio::test]
async fn test_can_produce_rejects_unknown_kind() {
    let (device, _factory) = loaded_device(EngineVariant::UnifiedPlan).await;
    let err = assert_err!(device.can_produce("data"));
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_no_common_video_codec() {
    let factory = Arc::new(FakeEngineFactory::new(EngineVariant::UnifiedPlan));
    let device = Device::new(factory);

    let mut router = router_rtp_capabilities();
    router.codecs.retain(|c| c.kind == MediaKind::Audio);
    assert_ok!(device.load(router).await);

    assert!(assert_ok!(device.can_produce("audio")));
    assert!(!assert_ok!(device.can_produce("video")));
}

#[tokio::test]
async fn test_accessors_require_load() {
    let device = Device::new(Arc::new(FakeEngineFactory::new(EngineVariant::UnifiedPlan)));

    assert!(!device.loaded());
    assert!(assert_err!(device.rtp_capabilities()).is_invalid_state());
    assert!(assert_err!(device.sctp_capabilities()).is_invalid_state());
    assert!(assert_err!(device.can_produce("audio")).is_invalid_state());

    let err = assert_err!(device.create_send_transport(transport_options("t1", false), FakeSignaling::new()));
    assert!(err.is_invalid_state());
}

#[tokio::test]
async fn test_second_load_is_invalid_state() {
    let (device, _factory) = loaded_device(EngineVariant::UnifiedPlan).await;

    let err = assert_err!(device.load(router_rtp_capabilities()).await);
    assert!(err.is_invalid_state());

    // even with garbage input
    let err = assert_err!(device.load(RtpCapabilities::default()).await);
    assert!(err.is_invalid_state());
}

#[tokio::test]
async fn test_failed_load_can_be_retried() {
    let device = Device::new(Arc::new(FakeEngineFactory::new(EngineVariant::UnifiedPlan)));

    let mut broken = router_rtp_capabilities();
    broken.codecs[2].parameters.clear();
    let err = assert_err!(device.load(broken).await);
    assert!(err.is_invalid_argument());
    assert!(!device.loaded());

    assert_ok!(device.load(router_rtp_capabilities()).await);
    assert!(device.loaded());
}

#[tokio::test]
async fn test_invalid_native_capabilities_fail_load() {
    let factory = Arc::new(FakeEngineFactory::new(EngineVariant::UnifiedPlan));
    factory.native.lock().codecs[0].mime_type = "opus".into();
    let device = Device::new(factory);

    let err = assert_err!(device.load(router_rtp_capabilities()).await);
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn test_create_transports() {
    let (device, factory) = loaded_device(EngineVariant::UnifiedPlan).await;

    let send = assert_ok!(device.create_send_transport(transport_options("send-1", true), FakeSignaling::new()));
    assert_eq!(send.id(), "send-1");
    assert_eq!(send.direction(), TransportDirection::Send);

    let recv = assert_ok!(device.create_recv_transport(transport_options("recv-1", false), FakeSignaling::new()));
    assert_eq!(recv.direction(), TransportDirection::Recv);

    let engines = factory.engines.lock();
    assert_eq!(engines.len(), 2);
    assert!(engines[0].options.sctp_parameters.is_some());
    assert!(engines[1].options.sctp_parameters.is_none());
    assert_eq!(engines[0].options.extended_rtp_capabilities.codecs.len(), 2);
}

#[tokio::test]
async fn test_create_transport_argument_errors() {
    let (device, _factory) = loaded_device(EngineVariant::UnifiedPlan).await;
    let signaling = FakeSignaling::new();

    let mut options = transport_options("t1", false);
    options.id.clear();
    assert!(assert_err!(device.create_send_transport(options, signaling.clone())).is_invalid_argument());

    let mut options = transport_options("t1", false);
    options.ice_parameters = None;
    assert!(assert_err!(device.create_send_transport(options, signaling.clone())).is_invalid_argument());

    let mut options = transport_options("t1", false);
    options.dtls_parameters = None;
    assert!(assert_err!(device.create_recv_transport(options, signaling.clone())).is_invalid_argument());

    let mut options = transport_options("t1", false);
    options.app_data = Some(json!(42));
    assert!(assert_err!(device.create_recv_transport(options, signaling)).is_invalid_argument());

    assert!(assert_err!(device.create_send_transport(TransportOptions::default(), FakeSignaling::new()))
        .is_invalid_argument());
}

#[tokio::test]
async fn test_engine_creation_failure_propagates() {
    let (device, factory) = loaded_device(EngineVariant::UnifiedPlan).await;
    factory
        .fail_create
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = assert_err!(device.create_send_transport(transport_options("t1", false), FakeSignaling::new()));
    assert!(!err.is_invalid_state());
}

#[tokio::test]
async fn test_transport_app_data_is_kept() {
    let (device, _factory) = loaded_device(EngineVariant::UnifiedPlan).await;

    let mut options = transport_options("t1", false);
    options.app_data = Some(json!({ "room": "lobby" }));
    let transport = assert_ok!(device.create_send_transport(options, FakeSignaling::new()));
    assert_eq!(transport.app_data()["room"], json!("lobby"));
}

#[tokio::test]
async fn test_device_config_is_applied() {
    let config = DeviceConfig::new().with_producer_defaults(ProducerDefaults {
        stop_tracks: false,
        ..Default::default()
    });
    let device = Device::with_config(Arc::new(FakeEngineFactory::new(EngineVariant::PlanB)), config);

    assert!(!device.config().producer_defaults.stop_tracks);
    assert_eq!(device.engine_variant(), EngineVariant::PlanB);
}

#[tokio::test]
#[traced_test]
async fn test_load_is_logged() {
    let (_device, _factory) = loaded_device(EngineVariant::UnifiedPlan).await;
    assert!(logs_contain("device loaded"));
}
