use layerloom_core::{LayerloomError, LayerloomResult, MAX_LAYERS};

use crate::surface::{
    sampler_name, AttribLocation, ProgramId, RenderSurface, ShaderSources, ShaderStage,
    UniformLocation, MODEL_VIEW_UNIFORM, POSITION_ATTRIBUTE, PROJECTION_UNIFORM,
};

/// The linked compositing program and the handles the compositor writes to.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    program: ProgramId,
    vertex_position: AttribLocation,
    projection: UniformLocation,
    model_view: UniformLocation,
    samplers: Vec<UniformLocation>,
}

impl ShaderProgram {
    /// Compile and link both stages and resolve the interface for `layer_count` slots.
    ///
    /// Any failure here is fatal: no partially built program is returned.
    pub fn build<S: RenderSurface + ?Sized>(
        surface: &mut S,
        sources: &ShaderSources,
        layer_count: usize,
    ) -> LayerloomResult<Self> {
        if layer_count == 0 || layer_count > MAX_LAYERS {
            return Err(LayerloomError::InvalidArgument(format!(
                "a program serves 1..={} layers, not {}",
                MAX_LAYERS, layer_count
            )));
        }
        let vertex = surface.compile_shader(ShaderStage::Vertex, &sources.vertex)?;
        let fragment = surface.compile_shader(ShaderStage::Fragment, &sources.fragment)?;
        let program = surface.link_program(vertex, fragment)?;

        let uniform = |name: &str| {
            surface
                .uniform_location(program, name)
                .ok_or_else(|| LayerloomError::MissingShaderInput(name.to_string()))
        };
        let projection = uniform(PROJECTION_UNIFORM)?;
        let model_view = uniform(MODEL_VIEW_UNIFORM)?;
        let samplers = (0..layer_count)
            .map(|slot| uniform(&sampler_name(slot)))
            .collect::<LayerloomResult<Vec<_>>>()?;
        let vertex_position = surface
            .attrib_location(program, POSITION_ATTRIBUTE)
            .ok_or_else(|| LayerloomError::MissingShaderInput(POSITION_ATTRIBUTE.to_string()))?;

        tracing::debug!("linked compositing program for {} layers", layer_count);
        Ok(Self {
            program,
            vertex_position,
            projection,
            model_view,
            samplers,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.program
    }

    pub fn vertex_position(&self) -> AttribLocation {
        self.vertex_position
    }

    pub fn projection(&self) -> UniformLocation {
        self.projection
    }

    pub fn model_view(&self) -> UniformLocation {
        self.model_view
    }

    /// Sampler uniform for `slot`, if the program serves that many layers.
    pub fn sampler(&self, slot: usize) -> Option<UniformLocation> {
        self.samplers.get(slot).copied()
    }

    pub fn layer_count(&self) -> usize {
        self.samplers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareSurface;

    #[test]
    fn test_build_stock_program() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let sources = surface.stock_shaders();
        let program = ShaderProgram::build(&mut surface, &sources, 4).unwrap();
        assert_eq!(program.layer_count(), 4);
        assert!(program.sampler(3).is_some());
        assert!(program.sampler(4).is_none());
    }

    #[test]
    fn test_missing_sampler_is_reported_by_name() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let mut sources = surface.stock_shaders();
        sources.fragment = "uniform sampler2D img0;\nvoid main(void) {}".into();
        let err = ShaderProgram::build(&mut surface, &sources, 2).unwrap_err();
        assert!(matches!(err, LayerloomError::MissingShaderInput(ref n) if n == "img1"));
    }

    #[test]
    fn test_compile_failure_aborts_build() {
        let mut surface = SoftwareSurface::new(4, 4).unwrap();
        let mut sources = surface.stock_shaders();
        sources.vertex = String::new();
        assert!(matches!(
            ShaderProgram::build(&mut surface, &sources, 1),
            Err(LayerloomError::ShaderCompile { .. })
        ));
    }
}
