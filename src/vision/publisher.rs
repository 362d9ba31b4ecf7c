use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use opencv::core::Vector;
use opencv::{imgcodecs, prelude::*};

use crate::camera::{CameraIntrinsics, FrameSource};
use crate::vision::overlay::{self, OverlayOptions};
use crate::vision::pose::{MarkerModel, PoseEstimator, PoseSnapshot};

/// A processed frame younger than this is reused for snapshots instead of
/// grabbing a new one, keeping drawings and detections in sync.
const FRESH_WINDOW: Duration = Duration::from_millis(500);

/// The most recent processed frame together with the pose that was solved
/// from it. Swapped as one pointer so readers never see a torn pair.
pub struct Published {
    pub frame: Mat,
    pub pose: Option<Arc<PoseSnapshot>>,
    pub captured_at: Instant,
}

struct PoseCache {
    snapshot: Option<Arc<PoseSnapshot>>,
    refreshed_at: Option<Instant>,
}

/// Single-producer holder of the latest undistorted frame and marker pose,
/// shared between the MJPEG streamer and on-demand tool snapshots.
pub struct FramePublisher {
    source: FrameSource,
    intrinsics: Arc<CameraIntrinsics>,
    estimator: PoseEstimator,
    cache_ttl: Duration,
    cache: Mutex<PoseCache>,
    latest: RwLock<Option<Arc<Published>>>,
}

impl FramePublisher {
    pub fn new(
        source: FrameSource,
        intrinsics: Arc<CameraIntrinsics>,
        estimator: PoseEstimator,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            source,
            intrinsics,
            estimator,
            cache_ttl,
            cache: Mutex::new(PoseCache {
                snapshot: None,
                refreshed_at: None,
            }),
            latest: RwLock::new(None),
        }
    }

    pub fn intrinsics(&self) -> &Arc<CameraIntrinsics> {
        &self.intrinsics
    }

    pub fn marker(&self) -> &MarkerModel {
        self.estimator.marker()
    }

    /// Refresh the marker pose, unless a solve younger than the cache TTL
    /// exists and `force` is not set. Returns whether a valid pose is held
    /// afterwards.
    pub fn update_pose(&self, force: bool) -> Result<bool, Box<dyn std::error::Error>> {
        if !force {
            let cache = self.cache.lock().unwrap();
            if let Some(refreshed_at) = cache.refreshed_at {
                if refreshed_at.elapsed() < self.cache_ttl {
                    return Ok(cache.snapshot.is_some());
                }
            }
        }
        self.capture_and_process()
    }

    /// Capture one frame, undistort it, solve the marker pose and publish
    /// both atomically. The capture lock is released before the (slower)
    /// processing starts.
    pub fn capture_and_process(&self) -> Result<bool, Box<dyn std::error::Error>> {
        let frame = match self.source.read()? {
            Some(frame) => frame,
            None => {
                // transient capture failure: the pose is no longer trustworthy
                let mut cache = self.cache.lock().unwrap();
                cache.snapshot = None;
                cache.refreshed_at = None;
                return Ok(false);
            }
        };
        let undistorted = self.intrinsics.undistort(&frame)?;
        let pose = self
            .estimator
            .estimate(&self.intrinsics, &undistorted)?
            .map(Arc::new);

        let captured_at = Instant::now();
        {
            let mut cache = self.cache.lock().unwrap();
            if pose.is_some() {
                cache.snapshot = pose.clone();
                cache.refreshed_at = Some(captured_at);
            } else {
                cache.snapshot = None;
                cache.refreshed_at = None;
            }
        }
        let published = Arc::new(Published {
            frame: undistorted,
            pose: pose.clone(),
            captured_at,
        });
        *self.latest.write().unwrap() = Some(published);
        Ok(pose.is_some())
    }

    /// The currently valid pose, if the last attempt succeeded.
    pub fn current_pose(&self) -> Option<Arc<PoseSnapshot>> {
        self.cache.lock().unwrap().snapshot.clone()
    }

    /// The latest published frame/pose pair.
    pub fn published(&self) -> Option<Arc<Published>> {
        self.latest.read().unwrap().clone()
    }

    /// Render the requested overlays onto a copy of the latest frame and
    /// encode it as JPEG. Does not touch the capture device.
    pub fn latest_jpeg(
        &self,
        options: &OverlayOptions,
    ) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error>> {
        let published = match self.published() {
            Some(published) => published,
            None => return Ok(None),
        };
        let mut frame = published.frame.try_clone()?;
        overlay::render(
            &mut frame,
            &self.intrinsics,
            published.pose.as_deref(),
            self.estimator.marker(),
            options,
        )?;
        let mut buffer = Vector::<u8>::new();
        imgcodecs::imencode(".jpg", &frame, &mut buffer, &Vector::new())?;
        Ok(Some(buffer.to_vec()))
    }

    /// Like `latest_jpeg`, base64-encoded, re-capturing first when the
    /// published frame has gone stale.
    pub fn snapshot_base64(
        &self,
        options: &OverlayOptions,
    ) -> Result<Option<String>, Box<dyn std::error::Error>> {
        let stale = match self.published() {
            Some(published) => published.captured_at.elapsed() >= FRESH_WINDOW,
            None => true,
        };
        if stale {
            self.capture_and_process()?;
        }
        Ok(self.latest_jpeg(options)?.map(|jpeg| BASE64.encode(jpeg)))
    }

    /// Plant a pose into the cache, as if it had just been solved.
    #[cfg(test)]
    pub(crate) fn seed_pose(&self, snapshot: PoseSnapshot) {
        let mut cache = self.cache.lock().unwrap();
        cache.snapshot = Some(Arc::new(snapshot));
        cache.refreshed_at = Some(Instant::now());
    }
}
