//! End-to-end tests: composed HTML through the built-in engine to a finished
//! manual.
//!
//! These tests validate:
//! - TOC targets, chapters and sections resolve to the pages they land on
//! - The finished document keeps its destinations and gains an outline
//! - Running heads are stamped on every page after the cover
//! - Output files are written, parent directories included

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use lopdf::Document;

use manual_forge::pdfdoc::decode_text_string;
use manual_forge::{
    build_manual, resolve_destinations, write_manual, DestinationNaming, ForgeRenderer,
    ManualConfig,
};

// =====================================================================
// Helpers
// =====================================================================

const GUIDE: &str = r##"<!DOCTYPE html>
<html>
<head><title>Operator Guide</title><style>.toc { list-style: none; }</style></head>
<body>
  <div class="cover"><h1>Operator Guide</h1><p>Release 4</p></div>

  <div class="page-break"></div>
  <h2>Contents</h2>
  <ul class="toc">
    <li>Intro <span class="toc-page" data-target="intro">0</span></li>
    <li>Setup <span class="toc-page" data-target="setup">0</span></li>
    <li>네트워크 <a class="toc-page" href="#네트워크">0</a></li>
    <li>Missing <span class="toc-page" data-target="nowhere">0</span></li>
  </ul>

  <div class="chapter" data-chapter-num="1" data-chapter-title="Intro">
    <h1 id="intro">1. Intro</h1>
    <p>What this guide covers.</p>
    <h2 id="setup">1.1 Setup</h2>
    <p>Install &amp; configure.</p>
  </div>

  <div class="chapter" data-chapter-num="2" data-chapter-title="네트워크">
    <h1 id="네트워크">2. 네트워크</h1>
    <h2 id="routes">2.1 Routes</h2>
    <pre>route add default gw 10.0.0.1</pre>
  </div>

  <div class="chapter" data-chapter-title="Appendix">
    <h1>Appendix</h1>
    <p>No anchors in here.</p>
  </div>
</body>
</html>"##;

fn config() -> ManualConfig {
    ManualConfig {
        title: "Operator Guide".to_string(),
        author: Some("Platform Team".to_string()),
        fallback_fonts: vec![PathBuf::from("/nonexistent/fallback.ttf")],
        ..ManualConfig::default()
    }
}

fn renderer() -> ForgeRenderer {
    ForgeRenderer::new(Duration::from_secs(60))
}

fn assert_valid_pdf(bytes: &[u8]) {
    assert!(bytes.len() > 100, "PDF too small: {} bytes", bytes.len());
    assert_eq!(&bytes[0..5], b"%PDF-", "Missing PDF header");
}

// =====================================================================
// Pipeline
// =====================================================================

#[test]
fn anchors_resolve_to_their_pages() {
    let out = build_manual(renderer(), GUIDE, &config()).unwrap();
    assert_valid_pdf(&out.pdf);

    // cover, contents, three chapters
    assert_eq!(out.total_pages, 5);
    assert_eq!(out.page_map.get("intro"), Some(3));
    assert_eq!(out.page_map.get("setup"), Some(3));
    assert_eq!(out.page_map.get("네트워크"), Some(4));
    assert_eq!(out.page_map.get("routes"), Some(4));
    assert_eq!(out.page_map.get("nowhere"), None);

    assert_eq!(out.chapter_pages(), vec![Some(3), Some(4), None]);
    assert_eq!(out.chapters[2].num, "3");
    assert!(out.chapters[2].anchor_id.is_empty());

    for section in &out.sections {
        let page = section.start_page.unwrap();
        assert!((1..=out.total_pages).contains(&page), "{section:?}");
    }
    let labels: Vec<_> = out.sections.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(
        labels,
        vec!["Chapter 1 — Intro", "1.1 Setup", "Chapter 2 — 네트워크", "2.1 Routes"]
    );
}

#[test]
fn finished_document_keeps_destinations() {
    let out = build_manual(renderer(), GUIDE, &config()).unwrap();
    let targets: HashSet<String> = ["intro", "setup", "네트워크", "routes"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let reread = resolve_destinations(&out.pdf, &targets, DestinationNaming::Literal).unwrap();
    assert_eq!(reread, out.page_map.restricted_to(targets.iter().map(String::as_str)));
}

#[test]
fn finished_document_has_outline_and_metadata() {
    let out = build_manual(renderer(), GUIDE, &config()).unwrap();
    assert_eq!(out.stamped_pages, 4);
    assert_eq!(out.outline_entries, 4);
    assert_eq!(out.fallback_font, None);

    let doc = Document::load_mem(&out.pdf).unwrap();
    assert_eq!(doc.get_pages().len(), 5);
    assert!(doc.catalog().unwrap().get(b"Outlines").is_ok());

    let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
    let info = doc.get_object(info_id).unwrap().as_dict().unwrap();
    let title = info.get(b"Title").unwrap().as_str().unwrap();
    assert_eq!(decode_text_string(title), "Operator Guide");
    let author = info.get(b"Author").unwrap().as_str().unwrap();
    assert_eq!(decode_text_string(author), "Platform Team");
}

#[test]
fn manual_without_anchors_still_builds() {
    let html = "<html><body><p>Only a cover.</p><div class=\"page-break\"></div><p>Body</p></body></html>";
    let out = build_manual(renderer(), html, &config()).unwrap();
    assert_eq!(out.total_pages, 2);
    assert!(out.page_map.is_empty());
    assert!(out.chapters.is_empty());
    assert_eq!(out.stamped_pages, 1);
    assert_eq!(out.outline_entries, 0);
}

#[test]
fn write_manual_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out").join("nested").join("guide.pdf");
    let out = write_manual(renderer(), GUIDE, &config(), &output).unwrap();

    let written = std::fs::read(&output).unwrap();
    assert_valid_pdf(&written);
    assert_eq!(written, out.pdf);
}

#[test]
fn invalid_config_is_rejected_before_rendering() {
    let mut config = config();
    config.print.margins.left = 400.0;
    config.print.margins.right = 400.0;
    let err = build_manual(renderer(), GUIDE, &config).unwrap_err();
    assert!(matches!(err, manual_forge::Error::Config(_)));
}
