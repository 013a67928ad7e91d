// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sketchwire contributors

//! Snapshot hand-off over the bulk transfer path, canvas to canvas.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;
use std::time::Duration;

use sketchwire::node::{CanvasHandler, MemoryCanvas};
use sketchwire::transfer::{receive_stream, send_stream};
use sketchwire::{Color, DrawOp, FontSpec, FontStyle, Point};

fn sample_ops() -> Vec<DrawOp> {
    vec![
        DrawOp::Line {
            start: Point::new(10, 20),
            end: Point::new(300, 400),
            color: Color::new(0xFF, 0x00, 0xFF),
            weight: 3,
        },
        DrawOp::Rectangle {
            start: Point::new(50, 50),
            end: Point::new(20, 10),
            color: Color::new(0, 0x80, 0),
            filled: true,
            bordered: true,
            border_color: Color::BLACK,
            border_weight: 2,
        },
        DrawOp::Text {
            origin: Point::new(100, 100),
            color: Color::BLACK,
            ch: 'A',
            font: FontSpec::new("Serif", FontStyle::Bold, true, 14),
        },
    ]
}

#[test]
fn test_snapshot_streams_between_canvases() {
    let serving = MemoryCanvas::new();
    for op in sample_ops() {
        serving.apply(&op);
    }
    let snapshot = serving.snapshot();

    let port = 47311;
    let receiver =
        thread::spawn(move || receive_stream(port, Duration::from_secs(5)).expect("receive"));
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    send_stream(addr, &snapshot, Duration::from_secs(5)).expect("send");

    let data = receiver.join().expect("join").expect("stream arrived");
    let joined = MemoryCanvas::new();
    joined.restore(&data);
    assert_eq!(joined.ops(), serving.ops());
}

#[test]
fn test_empty_snapshot_is_valid() {
    let port = 47312;
    let receiver =
        thread::spawn(move || receive_stream(port, Duration::from_secs(5)).expect("receive"));
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    send_stream(addr, &MemoryCanvas::new().snapshot(), Duration::from_secs(5)).expect("send");

    let data = receiver.join().expect("join").expect("stream arrived");
    let joined = MemoryCanvas::new();
    joined.apply(&sample_ops()[0]);
    joined.restore(&data);
    assert!(joined.is_empty());
}

#[test]
fn test_absent_sender_reports_none() {
    let got = receive_stream(47313, Duration::from_millis(300)).expect("receive");
    assert_eq!(got, None);
}
