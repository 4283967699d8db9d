//! End-to-end tests for chatrender using a mock fetch capability
//!
//! These drive the controller, link resolver and dispatcher the way a host
//! page would, without touching the network.

mod mock_fetch;

use anyhow::Result;
use chatrender::artifact::{ArtifactContent, ArtifactState, Badge};
use chatrender::assemble;
use chatrender::classify::{Classification, SourceBlock};
use chatrender::dispatcher::{self, Dispatcher, HostEvent, ProcessedSet};
use chatrender::fetch::{FetchAdapter, FetchBody, FetchError, Method};
use chatrender::host::{GeminiLocator, HostTree, MemoryTree, NodeId};
use chatrender::link::{ImageLinkPatterns, LinkOutcome, LinkResolver};
use chatrender::opener::TabOpener;
use chatrender::pipeline::{ActivateOutcome, LifecycleError, RenderController};
use chatrender::resources::ResourceStore;
use chatrender::surface::{LinkView, RecordingSurface};
use mock_fetch::MockFetcher;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ENDPOINT: &str = "https://kroki.test/mermaid/svg";
const BASE_URL: &str = "https://chat.test/app";
const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

struct Harness {
    mock: Arc<MockFetcher>,
    store: Arc<ResourceStore>,
    surface: Arc<RecordingSurface>,
    controller: Arc<RenderController>,
}

fn harness_with_base(base_url: &str) -> Harness {
    let mock = Arc::new(MockFetcher::new());
    let store = Arc::new(ResourceStore::new());
    let surface = Arc::new(RecordingSurface::new());
    let controller = Arc::new(RenderController::new(
        FetchAdapter::new(mock.clone()),
        store.clone(),
        surface.clone(),
        ENDPOINT,
        base_url,
    ));
    Harness {
        mock,
        store,
        surface,
        controller,
    }
}

fn harness() -> Harness {
    harness_with_base(BASE_URL)
}

#[derive(Default)]
struct RecordingOpener {
    opened: Mutex<Vec<String>>,
}

impl TabOpener for RecordingOpener {
    fn open_in_new_tab(&self, url: &str) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Labelled flowchart: diagram, no fixes, ready with only the success badge
#[tokio::test]
async fn test_mermaid_flowchart_end_to_end() -> Result<()> {
    let h = harness();
    h.mock.route_text(
        ENDPOINT,
        r#"<svg xmlns="http://www.w3.org/2000/svg"><g class="node"><text>A</text></g></svg>"#,
    );

    let block = NodeId(1);
    let classification = h
        .controller
        .register(block, SourceBlock::new("flowchart TD\nA-->B", "mermaid"));
    assert_eq!(classification, Classification::Diagram);
    assert_eq!(h.surface.trigger(block).unwrap().label, "📊 Render Diagram");

    let outcome = h.controller.activate(block).await?;
    assert_eq!(outcome, ActivateOutcome::Rendered(ArtifactState::Ready));
    assert!(h.controller.fixes(block).is_empty());

    let view = h.surface.artifact(block).unwrap();
    assert_eq!(view.state, ArtifactState::Ready);
    assert_eq!(view.badges, vec![Badge::Success]);
    assert!(matches!(view.content, ArtifactContent::Markup(_)));
    assert_eq!(h.surface.trigger(block).unwrap().label, "❌ Close Preview");

    let requests = h.mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(requests[0].body.as_deref(), Some("flowchart TD\nA-->B"));
    assert!(
        requests[0]
            .headers
            .contains(&("Accept".to_string(), "image/svg+xml".to_string()))
    );
    assert!(
        requests[0]
            .headers
            .contains(&("Content-Type".to_string(), "text/plain".to_string()))
    );
    Ok(())
}

#[tokio::test]
async fn test_diagram_labels_survive_sanitizing() -> Result<()> {
    let h = harness();
    h.mock.route_text(
        ENDPOINT,
        r#"<svg><g class="label"><text>Is user online = true?</text></g><a href="javascript:alert(1)"><text>x</text></a></svg>"#,
    );

    let block = NodeId(30);
    h.controller.register(
        block,
        SourceBlock::new("flowchart TD\nA{Is user online = true?}", "mermaid"),
    );
    h.controller.activate(block).await?;

    let view = h.surface.artifact(block).unwrap();
    match view.content {
        ArtifactContent::Markup(markup) => assert_eq!(
            markup.as_str(),
            r#"<svg><g class="label"><text>Is user online = true?</text></g><a><text>x</text></a></svg>"#
        ),
        other => panic!("expected diagram markup, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_gantt_fixes_add_warning_badge() -> Result<()> {
    let h = harness();
    h.mock.route_text(ENDPOINT, "<svg><g/></svg>");

    let block = NodeId(2);
    h.controller.register(
        block,
        SourceBlock::new(
            "gantt\n    title Plan\n    section A\n    Build :b1, after a1, after a2, 3d",
            "",
        ),
    );
    h.controller.activate(block).await?;

    let body = h.mock.requests()[0].body.clone().unwrap();
    assert!(body.contains("dateFormat YYYY-MM-DD"));
    assert!(body.contains("after a1"));
    assert!(!body.contains("after a2"));

    let view = h.surface.artifact(block).unwrap();
    assert_eq!(view.badges.len(), 2);
    assert_eq!(view.badges[0], Badge::Success);
    match &view.badges[1] {
        Badge::Warning { detail } => assert!(detail.starts_with("Applied fixes:\n")),
        other => panic!("expected warning badge, got {:?}", other),
    }
    assert_eq!(h.controller.fixes(block).len(), 2);
    Ok(())
}

/// An error drawing returned with 200 renders but earns no badges
#[tokio::test]
async fn test_error_shaped_success_has_no_badges() -> Result<()> {
    let h = harness();
    h.mock.route_text(
        ENDPOINT,
        r#"<svg aria-roledescription="error"><text>Syntax error in text</text></svg>"#,
    );
    let block = NodeId(3);
    h.controller
        .register(block, SourceBlock::new("graph TD\nA-->", "mermaid"));
    let outcome = h.controller.activate(block).await?;
    assert_eq!(outcome, ActivateOutcome::Rendered(ArtifactState::Ready));
    assert!(h.surface.artifact(block).unwrap().badges.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_embedded_error_diagram_is_shown() -> Result<()> {
    let h = harness();
    h.mock.route_error(
        ENDPOINT,
        FetchError::Status {
            code: 400,
            body: "Error 400: <?xml version=\"1.0\"?><svg aria-roledescription=\"error\"><script>steal()</script><text>Syntax error in text</text></svg>".into(),
        },
    );
    let block = NodeId(4);
    h.controller
        .register(block, SourceBlock::new("graph TD\nA-->", "mermaid"));
    let outcome = h.controller.activate(block).await?;
    assert_eq!(outcome, ActivateOutcome::Rendered(ArtifactState::Error));

    let view = h.surface.artifact(block).unwrap();
    match view.content {
        ArtifactContent::ErrorMarkup(markup) => {
            assert!(markup.as_str().starts_with("<svg aria-roledescription=\"error\">"));
            assert!(!markup.as_str().contains("<script"));
            assert!(markup.as_str().ends_with("</svg>"));
        }
        other => panic!("expected embedded error markup, got {:?}", other),
    }
    assert_eq!(h.surface.trigger(block).unwrap().label, "❌ Close Preview");
    Ok(())
}

#[tokio::test]
async fn test_diagram_timeout_shows_text() -> Result<()> {
    let h = harness();
    h.mock.route_error(ENDPOINT, FetchError::Timeout);
    let block = NodeId(5);
    h.controller
        .register(block, SourceBlock::new("pie\n\"a\": 1", ""));
    h.controller.activate(block).await?;
    assert_eq!(
        h.surface.artifact(block).unwrap().content,
        ArtifactContent::ErrorText("Mermaid Render Failed:\nRequest timed out".into())
    );
    Ok(())
}

/// Three scripts, the middle one failing and the first one slowest
#[tokio::test]
async fn test_assembly_with_partial_failure_keeps_order() -> Result<()> {
    let mock = Arc::new(MockFetcher::new());
    mock.route_text("https://cdn.test/a.js", "var a = 1;");
    mock.delay("https://cdn.test/a.js", Duration::from_millis(30));
    mock.route_error(
        "https://chat.test/b.js",
        FetchError::Status {
            code: 404,
            body: "missing".into(),
        },
    );
    mock.route_text("https://cdn.test/c.js", "var c = 3;");

    let fragment = r#"<html><head><script src="https://cdn.test/a.js"></script></head><body><script src="/b.js"></script><p>x</p><script src="https://cdn.test/c.js" defer></script></body></html>"#;
    let fetch = FetchAdapter::new(mock.clone());
    let statuses = Mutex::new(Vec::new());
    let status = |line: &str| statuses.lock().unwrap().push(line.to_string());
    let document = assemble::assemble(&fetch, fragment, BASE_URL, &status).await?;

    assert_eq!(document.inlined, 2);
    assert_eq!(document.failed, 1);
    assert_eq!(mock.requests().len(), 3);

    let html = &document.html;
    assert!(html.starts_with("<!DOCTYPE html><html><head>"));
    assert_eq!(html.matches("<script").count(), 3);
    assert!(!html.contains("src="));
    assert!(!html.contains("defer"));
    let a = html.find("var a = 1;").unwrap();
    let b = html
        .find("console.error(\"Failed to load script: https://chat.test/b.js.")
        .unwrap();
    let p = html.find("<p>x</p>").unwrap();
    let c = html.find("var c = 3;").unwrap();
    assert!(a < b && b < p && p < c);

    let statuses = statuses.into_inner().unwrap();
    assert_eq!(statuses.first().map(String::as_str), Some("Parsing HTML..."));
    assert!(statuses.contains(&"Found 3 external resource(s).".to_string()));
    assert!(statuses.contains(&"Downloading: b.js".to_string()));
    assert_eq!(
        statuses.last().map(String::as_str),
        Some("All resources embedded.")
    );
    Ok(())
}

#[tokio::test]
async fn test_stylesheet_failure_is_dropped() -> Result<()> {
    let mock = Arc::new(MockFetcher::new());
    mock.route_text("https://cdn.test/ok.css", "p { color: red; }");
    mock.route_error("https://cdn.test/bad.css", FetchError::Timeout);
    let fragment = r#"<link rel="stylesheet" href="https://cdn.test/ok.css" media="screen"><link rel="stylesheet" href="https://cdn.test/bad.css"><p>styled</p>"#;

    let fetch = FetchAdapter::new(mock);
    let document = assemble::assemble(&fetch, fragment, BASE_URL, &|_: &str| {}).await?;
    assert!(
        document
            .html
            .contains(r#"<style media="screen">p { color: red; }</style>"#)
    );
    assert!(!document.html.contains("bad.css"));
    assert!(!document.html.contains("<link"));
    Ok(())
}

#[tokio::test]
async fn test_document_render_reports_progress() -> Result<()> {
    let h = harness();
    h.mock.route_text("https://cdn.test/echarts.min.js", "window.echarts = {};");

    let block = NodeId(6);
    let classification = h.controller.register(
        block,
        SourceBlock::new(
            r#"<div id="c"></div><script src="https://cdn.test/echarts.min.js"></script>"#,
            "html",
        ),
    );
    assert_eq!(classification, Classification::Document);
    assert_eq!(h.surface.trigger(block).unwrap().label, "📈 Render ECharts");

    h.controller.activate(block).await?;
    assert_eq!(
        h.surface.status_history(block),
        vec![
            "Initializing...",
            "Parsing HTML...",
            "Found 1 external resource(s).",
            "Downloading: echarts.min.js",
            "All resources embedded.",
            "Render successful! 🎉",
        ]
    );

    let url = h.controller.document_url(block).unwrap();
    let document = h.store.get(&url).unwrap();
    assert_eq!(document.mime, "text/html");
    let html = String::from_utf8(document.bytes.to_vec())?;
    assert!(html.contains("window.echarts = {};"));
    assert!(h.surface.artifact(block).unwrap().can_open_externally);
    Ok(())
}

#[tokio::test]
async fn test_fatal_document_error() -> Result<()> {
    let h = harness_with_base("not a url");
    let block = NodeId(7);
    h.controller
        .register(block, SourceBlock::new("<p>hi</p>", "html"));
    let outcome = h.controller.activate(block).await?;
    assert_eq!(outcome, ActivateOutcome::Rendered(ArtifactState::Error));

    let view = h.surface.artifact(block).unwrap();
    assert!(view.status.starts_with("Fatal Error: Invalid base URL"));
    assert!(!view.can_open_externally);
    assert_eq!(h.store.live_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_activate_while_rendering_is_noop() -> Result<()> {
    let h = harness();
    h.mock.route_text(ENDPOINT, "<svg></svg>");
    h.mock.delay(ENDPOINT, Duration::from_millis(50));

    let block = NodeId(8);
    h.controller
        .register(block, SourceBlock::new("graph LR\nA-->B", ""));

    let controller = h.controller.clone();
    let first = tokio::spawn(async move { controller.activate(block).await });
    while h.controller.state(block) != Some(ArtifactState::Rendering) {
        tokio::task::yield_now().await;
    }

    let trigger = h.surface.trigger(block).unwrap();
    assert!(trigger.disabled);
    assert_eq!(trigger.label, "⏳ Rendering...");
    assert_eq!(h.controller.activate(block).await?, ActivateOutcome::Ignored);

    let outcome = first.await??;
    assert_eq!(outcome, ActivateOutcome::Rendered(ArtifactState::Ready));
    assert_eq!(h.mock.request_count(ENDPOINT), 1);
    assert!(!h.surface.trigger(block).unwrap().disabled);
    Ok(())
}

#[tokio::test]
async fn test_close_releases_handle_once() -> Result<()> {
    let h = harness();
    let block = NodeId(9);
    h.controller
        .register(block, SourceBlock::new("<p>hello</p>", "html"));

    h.controller.activate(block).await?;
    assert_eq!(h.store.live_count(), 1);
    let url = h.controller.document_url(block).unwrap();

    assert_eq!(h.controller.activate(block).await?, ActivateOutcome::Closed);
    assert_eq!(h.store.live_count(), 0);
    assert!(h.store.get(&url).is_none());
    assert_eq!(h.controller.state(block), Some(ArtifactState::Idle));
    assert!(h.surface.artifact(block).is_none());
    assert_eq!(h.surface.trigger(block).unwrap().label, "▶️ Render HTML");

    // a closed block renders again with a fresh handle
    h.controller.activate(block).await?;
    assert_eq!(h.store.live_count(), 1);
    assert_ne!(h.controller.document_url(block).unwrap(), url);
    h.controller.activate(block).await?;
    assert_eq!(h.store.live_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_open_externally() -> Result<()> {
    let h = harness();
    h.mock.route_text(ENDPOINT, "<svg></svg>");
    let document = NodeId(10);
    let diagram = NodeId(11);
    h.controller
        .register(document, SourceBlock::new("<p>doc</p>", "html"));
    h.controller
        .register(diagram, SourceBlock::new("graph TD\nA-->B", "mermaid"));

    let opener = RecordingOpener::default();
    assert!(matches!(
        h.controller.open_externally(document, &opener),
        Err(LifecycleError::NoDocument(_))
    ));

    h.controller.activate(document).await?;
    h.controller.activate(diagram).await?;
    let url = h.controller.open_externally(document, &opener)?;
    assert_eq!(*opener.opened.lock().unwrap(), vec![url]);
    assert!(matches!(
        h.controller.open_externally(diagram, &opener),
        Err(LifecycleError::NoDocument(_))
    ));
    assert!(matches!(
        h.controller.open_externally(NodeId(99), &opener),
        Err(LifecycleError::NotRegistered(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_unrenderable_block_not_registered() -> Result<()> {
    let h = harness();
    let block = NodeId(12);
    let classification = h
        .controller
        .register(block, SourceBlock::new("fn main() {}", "rust"));
    assert_eq!(classification, Classification::None);
    assert!(h.surface.trigger(block).is_none());
    assert!(matches!(
        h.controller.activate(block).await,
        Err(LifecycleError::NotRegistered(_))
    ));
    Ok(())
}

fn resolver(
    mock: &Arc<MockFetcher>,
) -> (
    LinkResolver,
    Arc<ResourceStore>,
    Arc<RecordingSurface>,
    Arc<ProcessedSet>,
) {
    let store = Arc::new(ResourceStore::new());
    let surface = Arc::new(RecordingSurface::new());
    let processed = Arc::new(ProcessedSet::new());
    let resolver = LinkResolver::new(
        FetchAdapter::new(mock.clone()),
        store.clone(),
        surface.clone(),
        processed.clone(),
        ImageLinkPatterns::default(),
    );
    (resolver, store, surface, processed)
}

#[tokio::test]
async fn test_wrapper_link_resolves_image() -> Result<()> {
    let mock = Arc::new(MockFetcher::new());
    mock.route_bytes("https://image.pollinations.ai/prompt/sunset", PNG_BYTES);
    let (resolver, store, surface, processed) = resolver(&mock);

    let link = NodeId(20);
    let outcome = resolver
        .resolve(
            link,
            "https://www.google.com/search?q=https://image.pollinations.ai/prompt/sunset",
        )
        .await;

    let LinkOutcome::Image { url } = outcome else {
        panic!("expected an image, got {:?}", outcome);
    };
    assert_eq!(mock.requests()[0].url, "https://image.pollinations.ai/prompt/sunset");
    assert_eq!(store.get(&url).unwrap().mime, "image/png");
    assert_eq!(surface.link(link), Some(LinkView::Image { url: url.clone() }));
    assert_eq!(resolver.image_url(link), Some(url));
    assert!(processed.contains_link(link));
    Ok(())
}

#[tokio::test]
async fn test_non_matching_link_untouched() -> Result<()> {
    let mock = Arc::new(MockFetcher::new());
    let (resolver, _store, surface, processed) = resolver(&mock);

    let link = NodeId(21);
    let outcome = resolver.resolve(link, "https://example.com/cat.png").await;
    assert_eq!(outcome, LinkOutcome::Ignored);
    assert!(!processed.contains_link(link));
    assert!(surface.link(link).is_none());
    assert!(mock.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_image_failure_is_final() -> Result<()> {
    let mock = Arc::new(MockFetcher::new());
    let image = "https://image.pollinations.ai/prompt/broken";
    mock.route_bytes(image, b"<html>rate limited</html>");
    let (resolver, store, surface, _processed) = resolver(&mock);

    let link = NodeId(22);
    let outcome = resolver.resolve(link, image).await;
    assert_eq!(
        outcome,
        LinkOutcome::Failed("Image failed to load: Image could not be decoded".into())
    );
    assert_eq!(
        surface.link(link),
        Some(LinkView::Error(
            "Image failed to load: Image could not be decoded".into()
        ))
    );
    assert_eq!(store.live_count(), 0);

    assert_eq!(resolver.resolve(link, image).await, LinkOutcome::AlreadyProcessed);
    assert_eq!(mock.request_count(image), 1);
    Ok(())
}

#[tokio::test]
async fn test_dispatcher_processes_each_node_once() -> Result<()> {
    let mock = Arc::new(MockFetcher::new());
    mock.queue_response(Ok(FetchBody::Text("<svg></svg>".into())));
    let image = "https://image.pollinations.ai/prompt/fox";
    mock.route_bytes(image, PNG_BYTES);

    let tree = Arc::new(MemoryTree::new());
    let message = tree.append_element(tree.root(), "div", &[("class", "message")]);
    let diagram = tree.append_code_block(message, "mermaid", "graph TD\nA-->B");
    let code = tree.append_code_block(message, "rust", "fn main() {}");
    let para = tree.append_element(message, "p", &[]);
    let link = tree.append_element(para, "a", &[("href", image)]);

    let store = Arc::new(ResourceStore::new());
    let surface = Arc::new(RecordingSurface::new());
    let mut config = chatrender::config::Config::default();
    config.render.diagram_endpoint = ENDPOINT.to_string();
    let dispatcher = Arc::new(Dispatcher::from_config(
        tree.clone(),
        Arc::new(GeminiLocator::default()),
        FetchAdapter::new(mock.clone()),
        store.clone(),
        surface.clone(),
        &config,
    ));

    let (tx, rx) = dispatcher::event_channel();
    let runner = tokio::spawn(dispatcher.clone().run(rx));

    // repeated notifications for nodes the initial scan already saw
    tx.send(HostEvent::Inserted(vec![message])).await?;
    tx.send(HostEvent::Inserted(vec![message, link])).await?;

    let late = tree.append_code_block(tree.root(), "html", "<p>late</p>");
    tx.send(HostEvent::Inserted(vec![late])).await?;
    tx.send(HostEvent::Activate(diagram)).await?;
    tx.send(HostEvent::Shutdown).await?;
    runner.await?;

    let controller = dispatcher.controller();
    assert_eq!(controller.blocks(), vec![diagram, late]);
    assert!(surface.trigger(code).is_none());
    assert_eq!(controller.state(diagram), Some(ArtifactState::Ready));
    assert_eq!(controller.state(late), Some(ArtifactState::Idle));
    assert_eq!(mock.request_count(image), 1);
    assert_eq!(mock.request_count(ENDPOINT), 1);
    assert!(matches!(surface.link(link), Some(LinkView::Image { .. })));
    assert!(dispatcher.processed().contains_block(diagram));
    assert!(!dispatcher.processed().contains_block(code));
    Ok(())
}

#[tokio::test]
async fn test_discover_checks_descendants() {
    let tree = Arc::new(MemoryTree::from_html(
        r#"<html><body><div class="response">
            <div class="code-block"><div class="code-block-decoration"><span>HTML</span></div><pre><code>&lt;h1&gt;x&lt;/h1&gt;</code></pre></div>
            <a href="https://image.pollinations.ai/prompt/owl">owl</a>
        </div></body></html>"#,
    ));
    let mock = Arc::new(MockFetcher::new());
    let dispatcher = Dispatcher::from_config(
        tree.clone(),
        Arc::new(GeminiLocator::default()),
        FetchAdapter::new(mock),
        Arc::new(ResourceStore::new()),
        Arc::new(RecordingSurface::new()),
        &chatrender::config::Config::default(),
    );

    let found = dispatcher.initial_scan();
    assert_eq!(found.blocks.len(), 1);
    assert_eq!(found.links.len(), 1);
    assert_eq!(found.links[0].1, "https://image.pollinations.ai/prompt/owl");
    assert_eq!(
        dispatcher.controller().classification(found.blocks[0]),
        Some(Classification::Document)
    );

    let again = dispatcher.initial_scan();
    assert!(again.blocks.is_empty());
}
