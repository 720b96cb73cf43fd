use burn::data::dataset::Dataset;

use crate::data::encoder::EncodedSample;

pub struct DialogueDataset {
    samples: Vec<EncodedSample>,
}

impl DialogueDataset {
    pub fn new(samples: Vec<EncodedSample>) -> Self {
        Self { samples }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Dataset<EncodedSample> for DialogueDataset {
    fn get(&self, index: usize) -> Option<EncodedSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
