use log::{Level, LevelFilter, Log, Record};
use spindle::logging::{AsyncFileAppender, Builder, Logger, LoggerRegistry};
use spindle::Fiber;
use std::fs;
use std::sync::Arc;

fn emit(registry: &LoggerRegistry, level: Level, target: &str, message: &str) {
    registry.log(
        &Record::builder()
            .args(format_args!("{}", message))
            .level(level)
            .target(target)
            .file(Some("tests/logging_test.rs"))
            .line(Some(42))
            .build(),
    );
}

#[test]
fn test_file_logger_routing_and_format() {
    let dir = tempfile::tempdir().unwrap();
    let fiber_log = Arc::new(AsyncFileAppender::open(dir.path().join("nested/fiber.log")).unwrap());
    let root_log = Arc::new(AsyncFileAppender::open(dir.path().join("root.log")).unwrap());

    let registry = Builder::new()
        .root(Logger::new("root").level(LevelFilter::Info).shared_appender(root_log.clone()))
        .logger(
            Logger::new("spindle::fiber")
                .level(LevelFilter::Debug)
                .shared_appender(fiber_log.clone()),
        )
        .build();

    emit(&registry, Level::Debug, "spindle::fiber", "fiber detail");
    emit(&registry, Level::Trace, "spindle::fiber", "too verbose");
    emit(&registry, Level::Info, "app", "hello");
    emit(&registry, Level::Debug, "app", "filtered");
    registry.flush();

    let fiber_text = fs::read_to_string(fiber_log.path()).unwrap();
    let root_text = fs::read_to_string(root_log.path()).unwrap();

    assert_eq!(fiber_text.lines().count(), 1);
    assert!(fiber_text.contains("[DEBUG] [spindle::fiber] tests/logging_test.rs:42 fiber detail"));
    assert_eq!(root_text.lines().count(), 1);
    assert!(root_text.contains("[INFO] [app] tests/logging_test.rs:42 hello"));
    assert_eq!(fiber_log.dropped(), 0);
}

#[test]
fn test_line_carries_thread_and_fiber() {
    let dir = tempfile::tempdir().unwrap();
    let file = Arc::new(AsyncFileAppender::open(dir.path().join("ids.log")).unwrap());
    let registry = Arc::new(
        Builder::new()
            .root(Logger::new("root").level(LevelFilter::Trace).shared_appender(file.clone()))
            .build(),
    );

    let inner = registry.clone();
    let fiber = Fiber::with_options(
        move || emit(&inner, Level::Warn, "app", "from fiber"),
        0,
        false,
    );
    fiber.resume();
    emit(&registry, Level::Warn, "app", "from thread");
    registry.flush();

    let text = fs::read_to_string(file.path()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);

    let tid = spindle::util::thread_id().to_string();
    let fields: Vec<&str> = lines[0].split_whitespace().collect();
    // date, time, tid, thread name, fiber id
    assert_eq!(fields[2], tid);
    assert_eq!(fields[4], fiber.id().to_string());
    assert!(lines[0].ends_with("from fiber"));

    let fields: Vec<&str> = lines[1].split_whitespace().collect();
    assert_eq!(fields[4], "0");
}

#[test]
fn test_second_install_is_rejected() {
    let quiet = || Builder::new().root(Logger::new("root").level(LevelFilter::Off));
    assert!(quiet().install().is_ok());
    assert!(matches!(quiet().install(), Err(spindle::Error::Logger(_))));
}
