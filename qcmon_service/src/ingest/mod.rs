pub mod fdsnws;
pub mod qc_xml;
pub mod scqueryqc;
