use tokio::select;
use tokio_util::sync::CancellationToken;

/// Waits until either the process gets interrupted or some module requests shutdown. In both
/// cases the token ends up cancelled.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => {},
    };
}
