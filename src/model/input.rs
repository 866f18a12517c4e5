//! Input adaptation: axis layout and channel normalization
//!
//! Clips arrive as `[batch, time, height, width, channel]`. Each backbone
//! wants its own axis order, and the RGB channels are centered around zero.

use burn::tensor::{backend::Backend, Tensor};

use crate::model::config::KeypointMode;

/// Amount subtracted from the RGB channels
pub const RGB_CENTER: f32 = 0.5;

/// Number of leading channels that carry RGB intensities
pub const RGB_CHANNELS: usize = 3;

/// Axis order of a clip tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `[B, T, H, W, C]`, the ingestion layout
    ChannelsLast,
    /// `[B, C, T, H, W]`
    ChannelsFirst,
    /// `[B, T, C, H, W]`
    FrameChannels,
}

impl InputLayout {
    /// Permutation taking the ingestion layout to this layout
    pub fn from_canonical(&self) -> [isize; 5] {
        match self {
            InputLayout::ChannelsLast => [0, 1, 2, 3, 4],
            InputLayout::ChannelsFirst => [0, 4, 1, 2, 3],
            InputLayout::FrameChannels => [0, 1, 4, 2, 3],
        }
    }

    /// Permutation taking this layout back to the ingestion layout
    pub fn to_canonical(&self) -> [isize; 5] {
        match self {
            InputLayout::ChannelsLast => [0, 1, 2, 3, 4],
            InputLayout::ChannelsFirst => [0, 2, 3, 4, 1],
            InputLayout::FrameChannels => [0, 1, 3, 4, 2],
        }
    }

    /// Axis holding the channels in this layout
    pub fn channel_axis(&self) -> usize {
        match self {
            InputLayout::ChannelsLast => 4,
            InputLayout::ChannelsFirst => 1,
            InputLayout::FrameChannels => 2,
        }
    }
}

/// Move a clip from the ingestion layout to `layout`
pub fn reshape<B: Backend>(x: Tensor<B, 5>, layout: InputLayout) -> Tensor<B, 5> {
    match layout {
        InputLayout::ChannelsLast => x,
        other => x.permute(other.from_canonical()),
    }
}

/// Move a clip in `layout` back to the ingestion layout
pub fn restore<B: Backend>(x: Tensor<B, 5>, layout: InputLayout) -> Tensor<B, 5> {
    match layout {
        InputLayout::ChannelsLast => x,
        other => x.permute(other.to_canonical()),
    }
}

/// Center the RGB channels of a clip in `layout`.
///
/// The keypoint channel, when present, is left as is; keypoint-only clips are
/// returned unchanged.
pub fn normalize<B: Backend>(
    x: Tensor<B, 5>,
    layout: InputLayout,
    mode: KeypointMode,
) -> Tensor<B, 5> {
    if !mode.normalizes_rgb() {
        return x;
    }

    let mut ranges = x.dims().map(|d| 0..d);
    ranges[layout.channel_axis()] = 0..RGB_CHANNELS;

    let rgb = x.clone().slice(ranges.clone()) - RGB_CENTER;
    x.slice_assign(ranges, rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Distribution, TensorData};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn clip(dims: [usize; 5]) -> Tensor<TestBackend, 5> {
        Tensor::random(dims, Distribution::Uniform(0.0, 1.0), &Default::default())
    }

    fn values(x: Tensor<TestBackend, 5>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_reshape_shapes() {
        let x = clip([2, 4, 6, 5, 3]);
        assert_eq!(reshape(x.clone(), InputLayout::ChannelsFirst).dims(), [2, 3, 4, 6, 5]);
        assert_eq!(reshape(x.clone(), InputLayout::FrameChannels).dims(), [2, 4, 3, 6, 5]);
        assert_eq!(reshape(x, InputLayout::ChannelsLast).dims(), [2, 4, 6, 5, 3]);
    }

    #[test]
    fn test_reshape_roundtrip_is_exact() {
        let x = clip([2, 3, 4, 5, 4]);
        for layout in [
            InputLayout::ChannelsLast,
            InputLayout::ChannelsFirst,
            InputLayout::FrameChannels,
        ] {
            let back = restore(reshape(x.clone(), layout), layout);
            assert_eq!(back.dims(), x.dims());
            assert_eq!(values(back), values(x.clone()));
        }
    }

    #[test]
    fn test_reshape_moves_elements() {
        // [1, T=2, H=1, W=1, C=3]: channel-first puts the three channels on axis 1
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [1, 2, 1, 1, 3]);
        let x = Tensor::<TestBackend, 5>::from_data(data, &Default::default());
        let y = reshape(x, InputLayout::ChannelsFirst);
        assert_eq!(values(y), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_normalize_is_undone_by_compensation() {
        let x = clip([2, 3, 4, 4, 3]);
        let layout = InputLayout::ChannelsFirst;
        let shaped = reshape(x, layout);
        let restored = normalize(shaped.clone(), layout, KeypointMode::Disabled) + RGB_CENTER;
        let diff: Vec<f32> = values(restored)
            .iter()
            .zip(values(shaped).iter())
            .map(|(a, b)| (a - b).abs())
            .collect();
        assert!(diff.iter().all(|d| *d < 1e-6));
    }

    #[test]
    fn test_normalize_leaves_keypoint_channel_untouched() {
        let x = clip([1, 2, 3, 3, 4]);
        for layout in [InputLayout::ChannelsFirst, InputLayout::FrameChannels] {
            let shaped = reshape(x.clone(), layout);
            let normalized = normalize(shaped.clone(), layout, KeypointMode::Enabled);

            let mut ranges = shaped.dims().map(|d| 0..d);
            ranges[layout.channel_axis()] = 3..4;
            let before = values(shaped.clone().slice(ranges.clone()));
            let after = values(normalized.clone().slice(ranges.clone()));
            assert_eq!(before, after);

            ranges[layout.channel_axis()] = 0..3;
            let rgb_before = values(shaped.slice(ranges.clone()));
            let rgb_after = values(normalized.slice(ranges));
            for (a, b) in rgb_after.iter().zip(rgb_before.iter()) {
                assert!((a - (b - RGB_CENTER)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_keypoints_only_is_identity() {
        let x = clip([2, 3, 4, 4, 1]);
        let y = normalize(x.clone(), InputLayout::ChannelsLast, KeypointMode::Only);
        assert_eq!(values(y), values(x));
    }
}
