//! 准入基准测试
//!
//! 测试请求准入热路径的延迟与调度器匹配的扩展性

use admitron::{
    capacity::{MockCapacityResolver, StaticPartitionRanges},
    config::{ControlStrategy, ThroughputControlConfig, ThroughputGroupConfig, ThroughputShare},
    container_controller::ThroughputContainerController,
    dispatcher::ControllerDispatcher,
    error::AdmissionError,
    request::{ChargedResponse, RequestContext},
    throttler::RequestThrottler,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// 构造一个预算充足的单组配置,基准期间不会触发预算耗尽
fn bench_config(container_name: &str) -> ThroughputControlConfig {
    ThroughputControlConfig {
        container_name: container_name.to_string(),
        refresh_interval_ms: None,
        host_id: Some("host-bench".to_string()),
        groups: vec![ThroughputGroupConfig {
            group_name: "oltp".to_string(),
            strategy: ControlStrategy::Local,
            share: ThroughputShare::Absolute {
                request_units: 1_000_000_000,
            },
            use_by_default: true,
            max_admission_delay_ms: Some(0),
        }],
    }
}

fn ready_controller(
    rt: &Runtime,
    container_name: &str,
    container_rid: &str,
) -> Arc<ThroughputContainerController> {
    let resolver = Arc::new(MockCapacityResolver::new(
        container_rid,
        format!("{}-db", container_rid),
    ));
    let controller = Arc::new(
        ThroughputContainerController::new(
            bench_config(container_name),
            resolver,
            Arc::new(StaticPartitionRanges::single()),
        )
        .unwrap(),
    );
    rt.block_on(controller.init()).unwrap();
    controller
}

async fn charged_call(
    controller: &ThroughputContainerController,
    request: &RequestContext,
) -> Result<ChargedResponse<()>, AdmissionError> {
    controller
        .process_request(request, || async { Ok(ChargedResponse::new((), 1.0)) })
        .await
}

async fn dispatched_call(
    dispatcher: &ControllerDispatcher,
    request: &RequestContext,
) -> Result<ChargedResponse<()>, AdmissionError> {
    dispatcher
        .dispatch_request(request, || async { Ok(ChargedResponse::new((), 1.0)) })
        .await
}

/// 基准测试：节流器准入延迟
fn bench_throttler_acquire(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let throttler = Arc::new(RequestThrottler::new("oltp", 1_000_000_000.0, None));

    c.bench_function("throttler_acquire", |b| {
        let throttler = throttler.clone();
        b.iter(|| {
            rt.block_on(async {
                let _ = black_box(throttler.acquire().await);
            });
        });
    });
}

/// 基准测试：带标签请求的完整准入与记账
fn bench_tagged_admission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let controller = ready_controller(&rt, "orders", "rid-col-bench");
    let request = RequestContext::new()
        .with_collection_rid("rid-col-bench")
        .with_group_tag("oltp");

    c.bench_function("tagged_admission", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = black_box(charged_call(&controller, &request).await);
            });
        });
    });
}

/// 基准测试：未带标签请求回退到默认组
fn bench_default_group_admission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let controller = ready_controller(&rt, "orders", "rid-col-bench");
    let request = RequestContext::new().with_collection_rid("rid-col-bench");

    c.bench_function("default_group_admission", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = black_box(charged_call(&controller, &request).await);
            });
        });
    });
}

/// 基准测试：不同注册规模下的调度器匹配
fn bench_dispatch_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch_scaling");

    for count in [1usize, 4, 16].iter() {
        let dispatcher = ControllerDispatcher::new();
        for index in 0..*count {
            let controller = ready_controller(
                &rt,
                &format!("container-{}", index),
                &format!("rid-col-{}", index),
            );
            dispatcher.register(controller);
        }
        // 匹配最后注册的容器,接近线性扫描的最坏情况
        let request = RequestContext::new().with_collection_rid(format!("rid-col-{}", count - 1));

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let _ = black_box(dispatched_call(&dispatcher, &request).await);
                });
            });
        });
    }

    group.finish();
}

/// 基准测试：批量准入
fn bench_admission_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let controller = ready_controller(&rt, "orders", "rid-col-bench");
    let request = RequestContext::new().with_collection_rid("rid-col-bench");

    let mut group = c.benchmark_group("admission_batch");

    for batch in [1usize, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            b.iter(|| {
                rt.block_on(async {
                    for _ in 0..batch {
                        let _ = black_box(charged_call(&controller, &request).await);
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_throttler_acquire,
    bench_tagged_admission,
    bench_default_group_admission,
    bench_dispatch_scaling,
    bench_admission_batch
);

criterion_main!(benches);
