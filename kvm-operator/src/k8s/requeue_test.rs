use std::time::Duration;

use anyhow::Result;

use super::*;

#[test]
fn earlier_deadline_supersedes_pending_resync() -> Result<()> {
    let mut requeues = Requeues::default();
    let name = Arc::new("al9qy".to_string());
    let now = Instant::now();
    let resync = now + Duration::from_secs(300);
    let retry = now + Duration::from_secs(10);

    assert!(requeues.schedule(&name, resync), "expected first deadline to start a timer");
    assert!(requeues.schedule(&name, retry), "expected earlier deadline to start a timer");

    assert!(requeues.fire(&name, retry), "expected earliest timer to run a pass");
    assert!(!requeues.fire(&name, resync), "expected superseded timer to be dropped");
    assert!(requeues.schedule(&name, resync), "expected nothing pending once the earliest pass ran");
    Ok(())
}

#[test]
fn later_or_equal_deadline_is_deduplicated() -> Result<()> {
    let mut requeues = Requeues::default();
    let name = Arc::new("al9qy".to_string());
    let retry = Instant::now() + Duration::from_secs(10);

    assert!(requeues.schedule(&name, retry));
    assert!(!requeues.schedule(&name, retry), "expected identical deadline to be deduplicated");
    assert!(!requeues.schedule(&name, retry + Duration::from_secs(300)), "expected later deadline to be deduplicated");
    assert!(requeues.fire(&name, retry), "expected pending timer to run a pass");

    assert!(requeues.schedule(&name, retry + Duration::from_secs(300)), "expected new deadline once the pending pass ran");
    Ok(())
}
