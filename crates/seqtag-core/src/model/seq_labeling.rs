//! # BiLSTM-CRF Tagger
//!
//! Word embeddings (optionally initialized from a filtered pretrained
//! matrix) concatenated with pooled character features, a bidirectional
//! LSTM, an emission layer and a tag transition matrix.

use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{
    AdamW, Embedding, Init, LSTM, LSTMConfig, Linear, Module, Optimizer, ParamsAdamW, RNN, SGD,
    VarBuilder, VarMap,
};
use tracing::{debug, info};

use crate::config::{ModelConfig, OptimizerKind, TrainingConfig};
use crate::embeddings::EmbeddingMatrix;
use crate::error::{Result, SeqTagError};
use crate::model::crf::crf_negative_log_likelihood;
use crate::model::viterbi::ViterbiDecoder;
use crate::model::{Prediction, SequenceModel};
use crate::preprocess::Batch;
use crate::vocab::{PAD, UNK};

const WORD_EMBEDDINGS: &str = "word_embeddings.weight";
/// Tag ids never predicted and left out of the CRF normalizer.
const RESERVED_TAGS: &[usize] = &[PAD as usize, UNK as usize];

enum TagOptimizer {
    Adam(AdamW),
    Sgd(SGD),
}

impl TagOptimizer {
    fn step(&mut self, grads: &candle_core::backprop::GradStore) -> candle_core::Result<()> {
        match self {
            TagOptimizer::Adam(opt) => opt.step(grads),
            TagOptimizer::Sgd(opt) => opt.step(grads),
        }
    }

    fn set_learning_rate(&mut self, lr: f64) {
        match self {
            TagOptimizer::Adam(opt) => opt.set_learning_rate(lr),
            TagOptimizer::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }
}

struct Training {
    optimizer: TagOptimizer,
    vars: Vec<Var>,
    clip_gradients: f64,
}

/// A BiLSTM-CRF sequence labeling model.
pub struct SeqLabeling {
    config: ModelConfig,
    varmap: VarMap,
    device: Device,
    word_embeddings: Embedding,
    char_embeddings: Option<(Embedding, Linear)>,
    forward_lstm: LSTM,
    backward_lstm: LSTM,
    emission: Linear,
    transitions: Tensor,
    training: Option<Training>,
}

impl SeqLabeling {
    fn with_varmap(config: &ModelConfig, varmap: VarMap, device: &Device) -> Result<Self> {
        config.validate()?;
        if config.num_tags < 3 || config.word_vocab_size < 2 {
            return Err(SeqTagError::InvalidConfig(format!(
                "model needs fitted vocabularies (words: {}, tags: {})",
                config.word_vocab_size, config.num_tags
            )));
        }

        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let word_embeddings = candle_nn::embedding(
            config.word_vocab_size,
            config.word_embedding_size,
            vb.pp("word_embeddings"),
        )?;

        let mut lstm_input = config.word_embedding_size;
        let char_embeddings = if config.char_feature {
            let embeddings = candle_nn::embedding(
                config.char_vocab_size.max(2),
                config.char_embedding_size,
                vb.pp("char_embeddings"),
            )?;
            let projection = candle_nn::linear(
                config.char_embedding_size,
                config.char_lstm_units,
                vb.pp("char_projection"),
            )?;
            lstm_input += config.char_lstm_units;
            Some((embeddings, projection))
        } else {
            None
        };

        let forward_lstm = candle_nn::lstm(
            lstm_input,
            config.word_lstm_units,
            LSTMConfig::default(),
            vb.pp("lstm_forward"),
        )?;
        let backward_lstm = candle_nn::lstm(
            lstm_input,
            config.word_lstm_units,
            LSTMConfig::default(),
            vb.pp("lstm_backward"),
        )?;
        let emission = candle_nn::linear(
            2 * config.word_lstm_units,
            config.num_tags,
            vb.pp("emission"),
        )?;
        let transitions = vb.pp("crf").get_with_hints(
            (config.num_tags, config.num_tags),
            "transitions",
            Init::Const(0.0),
        )?;

        Ok(Self {
            config: config.clone(),
            varmap,
            device: device.clone(),
            word_embeddings,
            char_embeddings,
            forward_lstm,
            backward_lstm,
            emission,
            transitions,
            training: None,
        })
    }

    /// Emission scores `(B, T, num_tags)`.
    fn emissions(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let tensors = batch.to_tensors(&self.device)?;
        let mut features = self.word_embeddings.forward(&tensors.word_ids)?;

        if let (Some((embeddings, projection)), Some(char_ids)) =
            (&self.char_embeddings, &tensors.char_ids)
        {
            features = Tensor::cat(&[&features, &self.char_features(batch, char_ids, embeddings, projection)?], 2)?;
        }

        if train && self.config.dropout > 0.0 {
            features = candle_nn::ops::dropout(&features, self.config.dropout)?;
        }

        let hidden = self.bidirectional(&features, &batch.lengths)?;
        let hidden = if train && self.config.dropout > 0.0 {
            candle_nn::ops::dropout(&hidden, self.config.dropout)?
        } else {
            hidden
        };
        Ok(self.emission.forward(&hidden)?)
    }

    /// Mean of non-pad character embeddings per word, projected and squashed.
    fn char_features(
        &self,
        batch: &Batch,
        char_ids: &Tensor,
        embeddings: &Embedding,
        projection: &Linear,
    ) -> Result<Tensor> {
        let (b, t, c) = char_ids.dims3()?;
        let mask: Vec<f32> = batch
            .char_ids
            .iter()
            .flatten()
            .flatten()
            .map(|&id| if id == PAD { 0.0 } else { 1.0 })
            .collect();
        let mask = Tensor::from_vec(mask, (b, t, c, 1), &self.device)?;

        let embedded = embeddings.forward(char_ids)?.broadcast_mul(&mask)?;
        let counts = mask.sum(2)?.clamp(1.0, f32::MAX)?;
        let pooled = embedded.sum(2)?.broadcast_div(&counts)?;
        Ok(projection.forward(&pooled)?.tanh()?)
    }

    /// Forward and backward LSTM states `(B, T, 2 * units)`.
    ///
    /// The backward pass reads each row reversed within its own length, so
    /// trailing pads never reach a real token. States at pad positions are
    /// zeroed.
    fn bidirectional(&self, features: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        let (b, t, d) = features.dims3()?;

        // Reverses positions 0..len of every row and leaves the pads in
        // place; applying it twice is the identity.
        let order: Vec<u32> = lengths
            .iter()
            .enumerate()
            .flat_map(|(row, &len)| {
                let len = len.min(t);
                (0..len)
                    .rev()
                    .chain(len..t)
                    .map(move |i| (row * t + i) as u32)
            })
            .collect();
        let order = Tensor::new(order.as_slice(), &self.device)?;

        let states = self.forward_lstm.seq(features)?;
        let forward = self.forward_lstm.states_to_tensor(&states)?;

        let reversed = features
            .reshape((b * t, d))?
            .index_select(&order, 0)?
            .reshape((b, t, d))?;
        let states = self.backward_lstm.seq(&reversed)?;
        let backward = self.backward_lstm.states_to_tensor(&states)?;
        let h = backward.dim(2)?;
        let backward = backward
            .reshape((b * t, h))?
            .index_select(&order, 0)?
            .reshape((b, t, h))?;

        let mask: Vec<f32> = lengths
            .iter()
            .flat_map(|&len| (0..t).map(move |i| if i < len { 1.0 } else { 0.0 }))
            .collect();
        let mask = Tensor::from_vec(mask, (b, t, 1), &self.device)?;

        Ok(Tensor::cat(&[&forward, &backward], 2)?.broadcast_mul(&mask)?)
    }

    fn decoder(&self) -> ViterbiDecoder {
        ViterbiDecoder::new(self.config.num_tags).with_forbidden_tags(RESERVED_TAGS)
    }

    fn clip(&self, grads: &mut candle_core::backprop::GradStore, vars: &[Var], max_norm: f64) -> Result<()> {
        if max_norm <= 0.0 {
            return Ok(());
        }
        let mut total = 0f64;
        for var in vars {
            if let Some(grad) = grads.get(var.as_tensor()) {
                total += grad.sqr()?.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
            }
        }
        let norm = total.sqrt();
        if norm > max_norm {
            let scale = max_norm / norm;
            for var in vars {
                if let Some(grad) = grads.get(var.as_tensor()) {
                    let scaled = (grad * scale)?;
                    grads.insert(var.as_tensor(), scaled);
                }
            }
            debug!(norm, max_norm, "clipped gradients");
        }
        Ok(())
    }
}

impl SequenceModel for SeqLabeling {
    fn build(config: &ModelConfig, embeddings: Option<&EmbeddingMatrix>, device: &Device) -> Result<Self> {
        let mut config = config.clone();
        if let Some(matrix) = embeddings {
            if matrix.rows() != config.word_vocab_size {
                return Err(SeqTagError::LengthMismatch {
                    what: "embedding rows vs word vocabulary",
                    expected: config.word_vocab_size,
                    found: matrix.rows(),
                });
            }
            config.word_embedding_size = matrix.dim();
        }

        let mut varmap = VarMap::new();
        let model = Self::with_varmap(&config, varmap.clone(), device)?;
        if let Some(matrix) = embeddings {
            varmap.set_one(WORD_EMBEDDINGS, matrix.to_tensor(device)?)?;
        }

        info!(
            words = config.word_vocab_size,
            chars = config.char_vocab_size,
            tags = config.num_tags,
            pretrained = embeddings.is_some(),
            "built sequence labeling model"
        );
        Ok(model)
    }

    fn load_weights(config: &ModelConfig, path: &Path, device: &Device) -> Result<Self> {
        let mut varmap = VarMap::new();
        let model = Self::with_varmap(config, varmap.clone(), device)?;
        varmap.load(path)?;
        info!(path = %path.display(), "loaded model weights");
        Ok(model)
    }

    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn configure_training(&mut self, training: &TrainingConfig) -> Result<()> {
        let frozen = self.word_embeddings.embeddings().id();
        let vars: Vec<Var> = self
            .varmap
            .all_vars()
            .into_iter()
            .filter(|var| training.train_embeddings || var.as_tensor().id() != frozen)
            .collect();

        let optimizer = match training.optimizer {
            OptimizerKind::Adam => TagOptimizer::Adam(AdamW::new(
                vars.clone(),
                ParamsAdamW {
                    lr: training.learning_rate,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Sgd => TagOptimizer::Sgd(SGD::new(vars.clone(), training.learning_rate)?),
        };

        self.training = Some(Training {
            optimizer,
            vars,
            clip_gradients: training.clip_gradients,
        });
        Ok(())
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        if let Some(training) = self.training.as_mut() {
            training.optimizer.set_learning_rate(learning_rate);
        }
    }

    fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        if self.training.is_none() {
            self.configure_training(&TrainingConfig::default())?;
        }
        let tag_ids = batch.tag_ids.as_ref().ok_or_else(|| {
            SeqTagError::InvalidConfig("training batch carries no tag ids".into())
        })?;
        if batch.max_len() == 0 {
            return Ok(0.0);
        }

        let emissions = self.emissions(batch, true)?;
        let loss = if self.config.crf {
            crf_negative_log_likelihood(
                &emissions,
                &self.transitions,
                tag_ids,
                &batch.lengths,
                RESERVED_TAGS,
            )?
        } else {
            let (b, t, c) = emissions.dims3()?;
            let positions: Vec<u32> = batch
                .lengths
                .iter()
                .enumerate()
                .flat_map(|(row, &len)| (0..len).map(move |i| (row * t + i) as u32))
                .collect();
            let targets: Vec<u32> = tag_ids
                .iter()
                .zip(&batch.lengths)
                .flat_map(|(row, &len)| row[..len].iter().copied())
                .collect();
            let positions = Tensor::new(positions.as_slice(), &self.device)?;
            let targets = Tensor::new(targets.as_slice(), &self.device)?;
            let logits = emissions.reshape((b * t, c))?.index_select(&positions, 0)?;
            candle_nn::loss::cross_entropy(&logits, &targets)?
        };

        let mut grads = loss.backward()?;
        let loss = loss.to_scalar::<f32>()?;
        let Some(mut training) = self.training.take() else {
            return Ok(loss);
        };
        let stepped = self
            .clip(&mut grads, &training.vars, training.clip_gradients)
            .and_then(|()| Ok(training.optimizer.step(&grads)?));
        self.training = Some(training);
        stepped?;

        debug!(loss, sentences = batch.len(), "train step");
        Ok(loss)
    }

    fn predict(&self, batch: &Batch) -> Result<Vec<Prediction>> {
        if batch.max_len() == 0 {
            return Ok(batch
                .lengths
                .iter()
                .map(|_| Prediction {
                    tag_ids: Vec::new(),
                    scores: Vec::new(),
                })
                .collect());
        }

        let emissions = self.emissions(batch, false)?;
        let probabilities = candle_nn::ops::softmax_last_dim(&emissions)?.to_vec3::<f32>()?;
        let emissions = emissions.to_vec3::<f32>()?;
        let transitions = self.transitions.to_vec2::<f32>()?;
        let decoder = self.decoder();

        emissions
            .into_iter()
            .zip(probabilities)
            .zip(&batch.lengths)
            .map(|((scores, probs), &len)| {
                let scores = &scores[..len];
                let path = if self.config.crf {
                    decoder.decode(scores, &transitions)?
                } else {
                    decoder.argmax(scores)
                };
                Ok(Prediction {
                    scores: path.iter().enumerate().map(|(i, &tag)| probs[i][tag]).collect(),
                    tag_ids: path.into_iter().map(|tag| tag as u32).collect(),
                })
            })
            .collect()
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        info!(path = %path.display(), "saved model weights");
        Ok(())
    }
}
