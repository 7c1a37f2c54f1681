mod common;

use common::{changed, StubAnalyzer};
use recheck::{
    spawn_reader, AggregatedAnalyzer, Analyzer, ChangeSet, Coordinator, CoordinatorOptions, CoordinatorState, InboundMessage, Issue, IssueFilter,
    IssueOrigin, OutboundMessage, Severity,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn coordinator(stub: &Arc<StubAnalyzer>, options: CoordinatorOptions) -> (Arc<Coordinator>, mpsc::UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
    (Arc::new(Coordinator::new(stub.port(), Arc::new(tx), options)), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

async fn notify(tx: &mpsc::Sender<InboundMessage>, files: &[&str]) {
    tx.send(InboundMessage::ChangedFiles { files: changed(files) })
        .await
        .unwrap();
}

#[tokio::test]
async fn burst_of_notifications_delivers_only_the_latest() {
    let stub = StubAnalyzer::new().with_delays([30]);
    let (coordinator, mut rx) = coordinator(&stub, CoordinatorOptions::default());

    let (tx, inbound) = mpsc::channel(16);
    let watcher = tokio::spawn(Arc::clone(&coordinator).watch(inbound));

    for n in 1..=5 {
        notify(&tx, &[format!("src/{}.ts", n).as_str()]).await;
    }
    drop(tx);
    watcher.await.unwrap().unwrap();

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    let issues = messages[0].issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].message, "src/5.ts");
    assert_eq!(stub.reports.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn later_notification_wins_even_when_it_finishes_first() {
    let stub = StubAnalyzer::new().with_delays([50, 20]);
    let (coordinator, mut rx) = coordinator(&stub, CoordinatorOptions::default());

    let (tx, inbound) = mpsc::channel(16);
    let watcher = tokio::spawn(Arc::clone(&coordinator).watch(inbound));

    notify(&tx, &["src/early.ts"]).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    notify(&tx, &["src/late.ts"]).await;
    drop(tx);
    watcher.await.unwrap().unwrap();

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].issues()[0].message, "src/late.ts");
    assert_eq!(coordinator.state(), CoordinatorState::Closed);
}

#[tokio::test]
async fn never_more_than_one_open_report() {
    let stub = StubAnalyzer::new().with_delays([15, 5, 10, 0, 5]);
    let options = CoordinatorOptions {
        max_concurrency: 3,
        ..Default::default()
    };
    let (coordinator, _rx) = coordinator(&stub, options);

    let (tx, inbound) = mpsc::channel(16);
    let watcher = tokio::spawn(Arc::clone(&coordinator).watch(inbound));
    for n in 0..5 {
        notify(&tx, &[format!("src/{}.ts", n).as_str()]).await;
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    drop(tx);
    watcher.await.unwrap().unwrap();

    assert_eq!(stub.max_open.load(Ordering::SeqCst), 1);
    assert_eq!(stub.open.load(Ordering::SeqCst), 0);
    assert_eq!(stub.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_analyzer_still_emits_empty_lists() {
    let stub = StubAnalyzer::new().failing();
    let (coordinator, mut rx) = coordinator(&stub, CoordinatorOptions::default());

    for n in 0..3 {
        let message = tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.check(changed(&[format!("src/{}.ts", n).as_str()])),
        )
        .await
        .expect("cycle hung")
        .unwrap()
        .unwrap();

        assert!(message.issues().is_empty());
    }

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 3);
    assert_eq!(stub.reports.load(Ordering::SeqCst), 3);
    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn cycle_exposes_dependencies_before_issues() {
    let stub = StubAnalyzer::new().with_delays([20]);
    let (coordinator, _rx) = coordinator(&stub, CoordinatorOptions::default());

    let cycle = coordinator.start_cycle(changed(&["src/a.ts"])).unwrap();
    let dependencies = cycle.dependencies().await.unwrap();
    assert!(dependencies.files.iter().any(|f| f.ends_with("a.ts")));
    assert!(cycle.issues_pending());

    let issues = cycle.issues().await.unwrap();
    assert_eq!(issues.len(), 1);

    // The cycle's futures are shared, so awaiting again does no new work.
    let again = cycle.issues().await.unwrap();
    assert_eq!(issues, again);
    let report = cycle.report().await.unwrap();
    assert_eq!(report.issues().await.unwrap(), issues);
    assert_eq!(stub.dependency_runs.load(Ordering::SeqCst), 1);
    assert_eq!(stub.issue_runs.load(Ordering::SeqCst), 1);

    coordinator.shutdown().await.unwrap();
    assert!(report.is_closed());
}

#[tokio::test]
async fn filter_runs_once_on_the_delivered_list() {
    let stub = StubAnalyzer::new().with_issues(vec![
        Issue::new(IssueOrigin::Typescript, Severity::Error, "TS2322", "error"),
        Issue::new(IssueOrigin::Typescript, Severity::Warning, "TS6133", "warning"),
    ]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let options = CoordinatorOptions {
        filter: IssueFilter::new(move |issue| {
            counted.fetch_add(1, Ordering::SeqCst);
            issue.severity == Severity::Error
        }),
        ..Default::default()
    };
    let (coordinator, _rx) = coordinator(&stub, options);

    let message = coordinator.check(ChangeSet::empty()).await.unwrap().unwrap();

    let codes: Vec<&str> = message.issues().iter().map(|i| i.code.as_str()).collect();
    assert_eq!(codes, vec!["TS2322"]);
    // Two scripted issues plus the stub's marker, each checked once.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn reported_time_covers_the_cycle() {
    let stub = StubAnalyzer::new().with_delays([25]);
    let (coordinator, _rx) = coordinator(&stub, CoordinatorOptions::default());

    let started = Instant::now();
    let message = coordinator.check(ChangeSet::empty()).await.unwrap().unwrap();
    let OutboundMessage::IssueList { time, .. } = message;

    assert!(time >= 25);
    assert!(time <= started.elapsed().as_millis() as u64);
    coordinator.shutdown().await.unwrap();
}

#[tokio::test]
async fn watches_newline_delimited_stdin_messages() {
    let stub = StubAnalyzer::new();
    let (coordinator, mut rx) = coordinator(&stub, CoordinatorOptions::default());

    let input = concat!(
        r#"{"type":"changedFiles","files":{"changedFiles":["src/a.ts"],"deletedFiles":["src/old.ts"]}}"#,
        "\n",
    );
    let inbound = spawn_reader(input.as_bytes(), 4);
    Arc::clone(&coordinator).watch(inbound).await.unwrap();

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    let seen = stub.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].deleted_files.len(), 1);
    assert_eq!(stub.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_connect_still_closes_the_previous_report() {
    let stub = StubAnalyzer::new().failing_connects([2]);
    let (coordinator, mut rx) = coordinator(&stub, CoordinatorOptions::default());

    let first = coordinator.check(changed(&["src/a.ts"])).await.unwrap().unwrap();
    assert_eq!(first.issues().len(), 1);
    assert_eq!(stub.open.load(Ordering::SeqCst), 1);

    // The second cycle cannot connect; its list is empty, but the first
    // report is released anyway.
    let second = coordinator.check(changed(&["src/b.ts"])).await.unwrap().unwrap();
    assert!(second.issues().is_empty());
    assert_eq!(stub.open.load(Ordering::SeqCst), 0);
    assert_eq!(stub.reports.load(Ordering::SeqCst), 1);

    let third = coordinator.check(changed(&["src/c.ts"])).await.unwrap().unwrap();
    assert_eq!(third.issues()[0].message, "src/c.ts");
    assert_eq!(stub.open.load(Ordering::SeqCst), 1);
    assert_eq!(stub.max_open.load(Ordering::SeqCst), 1);

    assert_eq!(drain(&mut rx).len(), 3);
    coordinator.shutdown().await.unwrap();
    assert_eq!(stub.open.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn superseded_one_shot_run_delivers_nothing() {
    let stub = StubAnalyzer::new().with_delays([40]);
    let options = CoordinatorOptions {
        watching: false,
        ..Default::default()
    };
    let (coordinator, mut rx) = coordinator(&stub, options);

    let run = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.run_once().await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = coordinator.start_cycle(changed(&["src/newer.ts"])).unwrap();

    assert_eq!(run.await.unwrap().unwrap(), None);
    assert!(drain(&mut rx).is_empty());
    assert!(coordinator.is_current(&newer));
    assert!(coordinator.is_closed());
    assert_eq!(stub.open.load(Ordering::SeqCst), 0);
    assert_eq!(stub.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn aggregated_analyzer_sees_every_cycle_unmerged() {
    let stub = StubAnalyzer::new().with_delays([10, 10, 10, 10]);
    let aggregated: Arc<dyn Analyzer> = Arc::new(AggregatedAnalyzer::new(vec![stub.port()]));
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let options = CoordinatorOptions {
        max_concurrency: 4,
        ..Default::default()
    };
    let coordinator = Arc::new(Coordinator::new(aggregated, Arc::new(tx), options));

    let (inbound_tx, inbound) = mpsc::channel(16);
    let watcher = tokio::spawn(Arc::clone(&coordinator).watch(inbound));
    for n in 0..4 {
        notify(&inbound_tx, &[format!("src/{}.ts", n).as_str()]).await;
    }
    drop(inbound_tx);
    watcher.await.unwrap().unwrap();

    // Every cycle reached the analyzer with its own change set; none was
    // cancelled or folded into a neighbour.
    let seen = stub.seen.lock();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|change| change.changed_files.len() == 1));
    assert_eq!(stub.max_open.load(Ordering::SeqCst), 1);

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].issues()[0].message, "src/3.ts");
}
