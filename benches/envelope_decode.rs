use bytes::Bytes;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sonic_rs::json;
use ward_realtime::{Envelope, EnvelopeKind, Notification};

const FRAMES: usize = 1_000;

fn notification_frame() -> Bytes {
    Bytes::from_static(
        br#"{"type":"notification","data":{"type":"warning","title":"Bed 4","message":"SpO2 below threshold","duration":8000,"timestamp":"2024-05-01T10:00:00.000Z"},"timestamp":"2024-05-01T10:00:00.000Z"}"#,
    )
}

fn observation_frame(readings: usize) -> Bytes {
    // Larger payload shaped like a batch of vitals pushed after a sync.
    let readings = readings.max(1);
    let mut s = String::with_capacity(128 + readings * 80);
    s.push_str("{\"type\":\"observation_added\",\"timestamp\":\"2024-05-01T10:00:00.000Z\",\"data\":{\"patient_id\":42,\"readings\":[");
    for i in 0..readings {
        if i != 0 {
            s.push(',');
        }
        s.push_str(&format!(
            "{{\"code\":\"hr\",\"value\":{},\"unit\":\"bpm\",\"at\":\"2024-05-01T10:{:02}:00Z\"}}",
            60 + (i % 40),
            i % 60
        ));
    }
    s.push_str("]}}");
    Bytes::from(s)
}

fn bench_decode_notifications(c: &mut Criterion) {
    let payload = notification_frame();
    c.bench_function(&format!("decode_notification_x{FRAMES}"), |b| {
        b.iter(|| {
            for _ in 0..FRAMES {
                let envelope = Envelope::decode(black_box(payload.as_ref())).unwrap();
                black_box(envelope);
            }
        })
    });

    c.bench_function(&format!("decode_notification_typed_x{FRAMES}"), |b| {
        b.iter(|| {
            for _ in 0..FRAMES {
                let envelope = Envelope::decode(black_box(payload.as_ref())).unwrap();
                let notification: Notification = envelope.payload().unwrap();
                black_box(notification);
            }
        })
    });
}

fn bench_decode_observation_batches(c: &mut Criterion) {
    for readings in [1usize, 16, 128] {
        let payload = observation_frame(readings);
        c.bench_function(&format!("decode_observation_n{readings}"), |b| {
            b.iter(|| {
                let envelope = Envelope::decode(black_box(payload.as_ref())).unwrap();
                black_box(envelope);
            })
        });
    }
}

fn bench_encode(c: &mut Criterion) {
    let envelope = Envelope::new(
        EnvelopeKind::PatientSelected,
        json!({"patient_id": 42, "client_id": "doctor-office", "timestamp": "2024-05-01T10:00:00.000Z"}),
    );
    c.bench_function("encode_patient_selected", |b| {
        b.iter(|| black_box(black_box(&envelope).encode().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_decode_notifications,
    bench_decode_observation_batches,
    bench_encode
);
criterion_main!(benches);
