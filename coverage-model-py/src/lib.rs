use coverage_model::parser::{self, ModelDocument};
use coverage_model::{CoverageDescriptor, CoverageModel, Descriptor, ModelError, Term};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use std::path::Path;

#[pymodule]
#[pyo3(name = "coverage_model")]
fn coverage_model_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyLinearModel>()?;
    m.add_function(wrap_pyfunction!(load_model, m)?)?;
    m.add_function(wrap_pyfunction!(parse_model, m)?)?;
    Ok(())
}

fn to_py_err(err: ModelError) -> PyErr {
    match err {
        ModelError::Io(e) => PyIOError::new_err(format!("Failed to read model: {}", e)),
        other => PyValueError::new_err(other.to_string()),
    }
}

#[pyclass(name = "LinearModel")]
#[derive(Clone)]
pub struct PyLinearModel {
    inner: CoverageModel,
    /// Every descriptor the document declared, so expansions can name
    /// descriptors that no term uses any more.
    known: Vec<CoverageDescriptor>,
}

impl From<ModelDocument> for PyLinearModel {
    fn from(document: ModelDocument) -> Self {
        PyLinearModel {
            inner: document.model,
            known: document.descriptors,
        }
    }
}

impl PyLinearModel {
    fn lookup(&self, name: &str) -> PyResult<CoverageDescriptor> {
        self.known
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| PyValueError::new_err(format!("Unknown descriptor: {}", name)))
    }

    fn check_length(&self, values: &[f64]) -> PyResult<()> {
        let expected = self.inner.descriptors().len();
        if values.len() < expected {
            return Err(PyValueError::new_err(format!(
                "Expected {} values, got {}",
                expected,
                values.len()
            )));
        }
        Ok(())
    }
}

#[pymethods]
impl PyLinearModel {
    #[staticmethod]
    fn load(path: &str) -> PyResult<Self> {
        let document = parser::load_document(Path::new(path)).map_err(to_py_err)?;
        Ok(PyLinearModel::from(document))
    }

    #[staticmethod]
    fn parse(xml: &str) -> PyResult<Self> {
        let document = parser::parse_document(xml.as_bytes()).map_err(to_py_err)?;
        Ok(PyLinearModel::from(document))
    }

    #[getter]
    fn target(&self) -> String {
        self.inner.target().clone()
    }

    /// Descriptor names, in the order `evaluate` expects values.
    #[getter]
    fn descriptors(&self) -> Vec<String> {
        self.inner
            .descriptors()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    #[getter]
    fn terms(&self) -> Vec<(f64, Vec<String>)> {
        self.inner
            .terms()
            .iter()
            .map(|term| {
                let names = term.descriptors.iter().map(|d| d.name().to_string()).collect();
                (term.coefficient, names)
            })
            .collect()
    }

    fn evaluate(&self, values: Vec<f64>) -> PyResult<f64> {
        self.check_length(&values)?;
        Ok(self.inner.evaluate(&values))
    }

    fn normalize(&self, mut values: Vec<f64>) -> PyResult<Vec<f64>> {
        self.check_length(&values)?;
        self.inner.normalize(&mut values);
        Ok(values)
    }

    /// Replaces `name` by the sum of `(coefficient, [descriptor names])` terms.
    fn substitute(&mut self, name: &str, terms: Vec<(f64, Vec<String>)>) -> PyResult<usize> {
        let descriptor = self.lookup(name)?;
        let expansion = terms
            .iter()
            .map(|(coefficient, names)| -> PyResult<Term<CoverageDescriptor>> {
                let descriptors = names
                    .iter()
                    .map(|n| self.lookup(n))
                    .collect::<PyResult<Vec<_>>>()?;
                Ok(Term::new(*coefficient, descriptors))
            })
            .collect::<PyResult<Vec<_>>>()?;

        self.inner
            .substitute(&descriptor, &expansion)
            .map_err(to_py_err)
    }

    fn __repr__(&self) -> String {
        format!(
            "LinearModel(target='{}', terms={}, descriptors={})",
            self.inner.target(),
            self.inner.terms().len(),
            self.inner.descriptors().len()
        )
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }
}

#[pyfunction]
pub fn load_model(path: &str) -> PyResult<PyLinearModel> {
    PyLinearModel::load(path)
}

#[pyfunction]
pub fn parse_model(xml: &str) -> PyResult<PyLinearModel> {
    PyLinearModel::parse(xml)
}

