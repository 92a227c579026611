use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use http::Request;
use http::Response;
use tier_limit::AdmissionEngine;
use tier_limit::ClientThrottle;
use tier_limit::IdentityResolver;
use tier_limit::InMemoryCounterStore;
use tier_limit::PolicyRegistry;
use tier_limit::RateLimitPolicy;
use tier_limit::StaticTierSource;
use tier_limit::Tier;
use tokio::time::sleep;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use tower_tier::AdmissionLayer;
use tower_tier::ClientThrottleLayer;
use tower_tier::ThrottleError;
use tower_tier::X_RATELIMIT_REMAINING;

#[tokio::main]
async fn main() {
    // 1. Setup Policy: 20 requests per 2 second sliding window
    let limit = NonZeroU32::new(20).unwrap();
    let window = Duration::from_secs(2);
    let policy = RateLimitPolicy::new(Tier::Free, limit, window).unwrap();
    let registry = Arc::new(PolicyRegistry::new([policy]).unwrap());
    let engine = Arc::new(AdmissionEngine::new(
        registry,
        Arc::new(InMemoryCounterStore::new()),
    ));

    // 2. Setup Admission Layer: every caller is a free tier caller
    let resolver = IdentityResolver::new(Arc::new(StaticTierSource(Tier::Free)));
    let admission = AdmissionLayer::new(engine, resolver);

    // 3. Define a "Work" service
    let service = tower::service_fn(|_req: Request<String>| async {
        // Simulate a tiny bit of processing time
        sleep(Duration::from_millis(1)).await;
        Ok::<_, tower::BoxError>(Response::new("Request Successful".to_string()))
    });

    // 4. The client keeps a mirror of the server quota
    let throttle = Arc::new(ClientThrottle::new());
    let client = ClientThrottleLayer::new(throttle).layer(admission.layer(service));

    println!("🚀 Starting Stress Test...");
    println!("Policy: 20 requests / 2s sliding window");
    println!("Client: advisory throttle in front of the server\n");

    // 5. Fire 60 requests, 50ms apart
    for i in 0..60 {
        let mut svc = client.clone();
        let req = Request::builder()
            .header("x-caller-id", "stress")
            .body(String::new())
            .unwrap();
        match svc.ready().await {
            Ok(ready_svc) => match ready_svc.call(req).await {
                Ok(resp) if resp.status().is_success() => {
                    let remaining = resp
                        .headers()
                        .get(&X_RATELIMIT_REMAINING)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("?");
                    println!("[{i:03}] ✅ {} (remaining {remaining})", resp.body());
                }
                Ok(resp) => println!("[{i:03}] ❌ Server Rejected: {}", resp.body()),
                Err(e) => {
                    if let Some(throttle_err) = e.downcast_ref::<ThrottleError>() {
                        println!("[{i:03}] ⏳ Not Sent: {throttle_err}");
                    } else {
                        println!("[{i:03}] 💥 Unexpected Error: {e}");
                    }
                }
            },
            Err(e) => println!("[{i:03}] ⚠️ Service Unavailable: {e}"),
        }
        sleep(Duration::from_millis(50)).await;
    }

    println!("\n🏁 Stress test complete.");
}
