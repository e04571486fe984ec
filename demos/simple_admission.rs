//! 简单准入示例

use admitron::capacity::{MockCapacityResolver, OfferScript, StaticPartitionRanges, ThroughputOffer};
use admitron::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // 创建配置:oltp按比例分走80%容量,reporting固定50 RU/s且立即硬拒绝
    let yaml = r#"
container_name: orders
groups:
  - group_name: oltp
    strategy:
      type: Local
    share:
      type: Fraction
      ratio: 0.8
    use_by_default: true
  - group_name: reporting
    strategy:
      type: Local
    share:
      type: Absolute
      request_units: 50
    max_admission_delay_ms: 0
"#;
    let config = ThroughputControlConfig::from_yaml_str(yaml).unwrap();

    // 创建控制器,容量解析脚本返回1000 RU/s的手动报价
    let resolver = Arc::new(MockCapacityResolver::new("rid-orders", "rid-orders-db"));
    resolver.script_offer("rid-orders", OfferScript::Offer(ThroughputOffer::manual(1000)));
    let controller = Arc::new(
        ThroughputContainerController::new(
            config,
            resolver,
            Arc::new(StaticPartitionRanges::single()),
        )
        .unwrap(),
    );
    controller.init().await.unwrap();

    for (group, throughput) in controller.snapshot().group_throughput {
        println!("吞吐量组[{}]额度: {} RU/s", group, throughput);
    }

    // 未打标的请求走默认组oltp
    let request = RequestContext::new();
    let response: Result<ChargedResponse<&str>, AdmissionError> = controller
        .process_request(&request, || async { Ok(ChargedResponse::new("订单已写入", 2.5)) })
        .await;
    println!("默认组请求: {}", response.unwrap().payload);

    // reporting组预算50,首个请求乐观放行并记账60,下一个请求被硬拒绝
    let tagged = RequestContext::new().with_group_tag("reporting");
    let first: Result<ChargedResponse<&str>, AdmissionError> = controller
        .process_request(&tagged, || async { Ok(ChargedResponse::new("报表已生成", 60.0)) })
        .await;
    println!("报表请求: {}", first.unwrap().payload);

    let second: Result<ChargedResponse<&str>, AdmissionError> = controller
        .process_request(&tagged, || async { Ok(ChargedResponse::new("报表已生成", 60.0)) })
        .await;
    match second {
        Ok(response) => println!("报表请求: {}", response.payload),
        Err(AdmissionError::GroupBudgetExhausted { group, retry_after_ms }) => {
            println!("吞吐量组[{}]预算耗尽,建议{}ms后重试", group, retry_after_ms);
        }
        Err(e) => eprintln!("错误: {}", e),
    }

    controller.close().await;
}
