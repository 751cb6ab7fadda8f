use super::keypoint::{Keypoint, KeypointIndex, Pose};

/// フレーム内の検出済みランドマーク (ピクセル座標)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Landmark {
    pub x: i32,
    pub y: i32,
}

impl Landmark {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// 衣服の配置に使う上半身ランドマーク一式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TorsoLandmarks {
    pub left_shoulder: Landmark,
    pub right_shoulder: Landmark,
    pub left_hip: Landmark,
    pub right_hip: Landmark,
}

impl TorsoLandmarks {
    /// 姿勢から上半身ランドマークをピクセル座標で抽出する。
    ///
    /// 両肩の信頼度が `min_confidence` 未満の場合は None
    /// (このティックは姿勢なしとして扱う)。
    pub fn from_pose(
        pose: &Pose,
        frame_width: u32,
        frame_height: u32,
        min_confidence: f32,
    ) -> Option<Self> {
        let left_shoulder = pose.get(KeypointIndex::LeftShoulder);
        let right_shoulder = pose.get(KeypointIndex::RightShoulder);
        if !left_shoulder.is_valid(min_confidence) || !right_shoulder.is_valid(min_confidence) {
            return None;
        }

        let pixel = |kp: &Keypoint| {
            let (x, y) = kp.to_pixel(frame_width, frame_height);
            Landmark::new(x, y)
        };

        Some(Self {
            left_shoulder: pixel(left_shoulder),
            right_shoulder: pixel(right_shoulder),
            left_hip: pixel(pose.get(KeypointIndex::LeftHip)),
            right_hip: pixel(pose.get(KeypointIndex::RightHip)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_with(entries: &[(KeypointIndex, f32, f32, f32)]) -> Pose {
        let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
        for &(index, x, y, confidence) in entries {
            keypoints[index as usize] = Keypoint::new(x, y, confidence);
        }
        Pose::new(keypoints)
    }

    #[test]
    fn test_torso_extracted_in_pixels() {
        let pose = pose_with(&[
            (KeypointIndex::LeftShoulder, 0.3125, 0.2778, 0.9),
            (KeypointIndex::RightShoulder, 0.5208, 0.2778, 0.9),
            (KeypointIndex::LeftHip, 0.35, 0.55, 0.8),
            (KeypointIndex::RightHip, 0.5, 0.55, 0.8),
        ]);

        let torso = TorsoLandmarks::from_pose(&pose, 960, 720, 0.3).unwrap();
        assert_eq!(torso.left_shoulder, Landmark::new(300, 200));
        assert_eq!(torso.right_shoulder, Landmark::new(499, 200));
        assert_eq!(torso.left_hip, Landmark::new(336, 396));
    }

    #[test]
    fn test_no_pose_when_shoulder_confidence_low() {
        let pose = pose_with(&[
            (KeypointIndex::LeftShoulder, 0.3, 0.3, 0.1),
            (KeypointIndex::RightShoulder, 0.5, 0.3, 0.9),
        ]);
        assert!(TorsoLandmarks::from_pose(&pose, 960, 720, 0.3).is_none());
    }

    #[test]
    fn test_no_pose_on_empty_detection() {
        let pose = Pose::default();
        assert!(TorsoLandmarks::from_pose(&pose, 960, 720, 0.3).is_none());
    }
}
