use crate::core::Pipeline;
use crate::utils::error::Result;
use std::time::Instant;

/// 依序執行 extract / transform / load 三個階段
pub struct TransferEngine<P: Pipeline> {
    name: String,
    pipeline: P,
}

impl<P: Pipeline> TransferEngine<P> {
    pub fn new(name: impl Into<String>, pipeline: P) -> Self {
        Self {
            name: name.into(),
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<P::Output> {
        let started = Instant::now();
        tracing::info!("🚀 Starting {}", self.name);

        let phase = Instant::now();
        let extracted = self.pipeline.extract().await.inspect_err(|e| {
            tracing::error!("❌ {} extract failed: {}", self.name, e);
        })?;
        tracing::info!("📥 {} extract finished in {:?}", self.name, phase.elapsed());

        let phase = Instant::now();
        let transformed = self.pipeline.transform(extracted).await.inspect_err(|e| {
            tracing::error!("❌ {} transform failed: {}", self.name, e);
        })?;
        tracing::info!("🔧 {} transform finished in {:?}", self.name, phase.elapsed());

        let phase = Instant::now();
        let output = self.pipeline.load(transformed).await.inspect_err(|e| {
            tracing::error!("❌ {} load failed: {}", self.name, e);
        })?;
        tracing::info!("📤 {} load finished in {:?}", self.name, phase.elapsed());

        tracing::info!("✅ {} completed in {:?}", self.name, started.elapsed());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::MealError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CountingPipeline {
        phases: Mutex<Vec<&'static str>>,
        fail_transform: bool,
    }

    #[async_trait]
    impl Pipeline for CountingPipeline {
        type Extracted = Vec<u32>;
        type Transformed = u32;
        type Output = String;

        async fn extract(&self) -> Result<Vec<u32>> {
            self.phases.lock().unwrap().push("extract");
            Ok(vec![1, 2, 3])
        }

        async fn transform(&self, data: Vec<u32>) -> Result<u32> {
            self.phases.lock().unwrap().push("transform");
            if self.fail_transform {
                return Err(MealError::ImportError {
                    message: "bad data".to_string(),
                });
            }
            Ok(data.iter().sum())
        }

        async fn load(&self, data: u32) -> Result<String> {
            self.phases.lock().unwrap().push("load");
            Ok(format!("total={}", data))
        }
    }

    #[tokio::test]
    async fn test_runs_phases_in_order() {
        let engine = TransferEngine::new(
            "test",
            CountingPipeline {
                phases: Mutex::new(vec![]),
                fail_transform: false,
            },
        );

        let output = engine.run().await.unwrap();
        assert_eq!(output, "total=6");
        assert_eq!(
            *engine.pipeline().phases.lock().unwrap(),
            vec!["extract", "transform", "load"]
        );
    }

    #[tokio::test]
    async fn test_stops_after_failed_phase() {
        let engine = TransferEngine::new(
            "test",
            CountingPipeline {
                phases: Mutex::new(vec![]),
                fail_transform: true,
            },
        );

        assert!(engine.run().await.is_err());
        assert_eq!(
            *engine.pipeline().phases.lock().unwrap(),
            vec!["extract", "transform"]
        );
    }
}
