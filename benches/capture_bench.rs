//! Hot-path costs: event dispatch into the prebuffer, duplicate-click
//! rejection while armed, target snapshots, and whole-document
//! serialization.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tracecap_engine::capture::snapshot;
use tracecap_engine::capture::SessionRecorder;
use tracecap_engine::host::page::Page;
use tracecap_engine::host::serialize::{self, SerializeOptions};
use tracecap_engine::host::DocId;
use tracecap_engine::marker::{ScriptedMarker, MARKER_SCRIPT_ID};
use tracecap_engine::utils::time::ManualClock;

/// A mid-size storefront page: nav links, a form, one target button.
fn storefront_html() -> String {
    let mut html = String::from("<nav><ul>");
    for i in 0..20 {
        html.push_str(&format!(
            "<li><a href=\"/c/{i}\" class=\"nav-link\">Category {i}</a></li>"
        ));
    }
    html.push_str("</ul></nav><main><form id=\"checkout\">");
    for i in 0..20 {
        html.push_str(&format!(
            "<label for=\"f{i}\">Field {i}</label><input id=\"f{i}\" name=\"f{i}\" value=\"v{i}\">"
        ));
    }
    html.push_str(
        "<button id=\"target\" class=\"btn primary\" aria-label=\"Place order\">Place order</button>",
    );
    html.push_str("</form></main>");
    html
}

/// Dispatch cost while disarmed: listener walk, snapshot, ring push.
fn bench_prebuffer_dispatch(c: &mut Criterion) {
    let clock = ManualClock::new(1_000);
    let page = Page::with_html(clock.clone(), "https://shop.bench/a", &storefront_html());
    let (recorder, _rx) = SessionRecorder::new(page, Box::new(ScriptedMarker::new()), None);
    let page = recorder.page();
    let target = page.lock().dom(DocId::MAIN).find_by_id("target").unwrap();

    c.bench_function("prebuffer_dispatch", |b| {
        b.iter(|| {
            // Spacing keeps every click outside the dedup windows.
            clock.advance(300);
            page.lock().click(DocId::MAIN, black_box(target), 10.0, 10.0)
        })
    });
}

/// Dispatch cost of a rejected duplicate: the common case under
/// double-click storms.
fn bench_duplicate_click_reject(c: &mut Criterion) {
    let clock = ManualClock::new(1_000);
    let page = Page::with_html(clock.clone(), "https://shop.bench/a", &storefront_html());
    let (recorder, _rx) = SessionRecorder::new(page, Box::new(ScriptedMarker::new()), None);
    recorder.arm("bench-task", 1_000, 0).unwrap();
    let page = recorder.page();
    let target = page.lock().dom(DocId::MAIN).find_by_id("target").unwrap();
    // Seed the window with one accepted click.
    page.lock().click(DocId::MAIN, target, 10.0, 10.0);

    c.bench_function("duplicate_click_reject", |b| {
        b.iter(|| page.lock().click(DocId::MAIN, black_box(target), 10.0, 10.0))
    });
}

fn bench_target_snapshot(c: &mut Criterion) {
    let clock = ManualClock::new(0);
    let page = Page::with_html(clock, "https://shop.bench/a", &storefront_html());
    let target = page.dom(DocId::MAIN).find_by_id("target").unwrap();

    c.bench_function("target_snapshot", |b| {
        b.iter(|| snapshot::capture(black_box(&page), DocId::MAIN, target))
    });
}

fn bench_document_serialize(c: &mut Criterion) {
    let clock = ManualClock::new(0);
    let page = Page::with_html(clock, "https://shop.bench/a", &storefront_html());
    let opts = SerializeOptions::page_capture(MARKER_SCRIPT_ID);

    c.bench_function("document_serialize", |b| {
        b.iter(|| serialize::document_html(black_box(&page), DocId::MAIN, &opts))
    });
}

criterion_group!(
    benches,
    bench_prebuffer_dispatch,
    bench_duplicate_click_reject,
    bench_target_snapshot,
    bench_document_serialize
);
criterion_main!(benches);
