use once_cell::sync::OnceCell;

use crate::{
    error::ServiceError,
    models::certificado::NovoCertificado,
    services::functional_patterns::{validation_rules, Validator},
};

pub fn novo_certificado_validator() -> Validator<NovoCertificado> {
    Validator::new()
        .rule(|dto: &NovoCertificado| validation_rules::required("tenant_id")(&dto.tenant_id))
        .rule(|dto: &NovoCertificado| validation_rules::max_length("tenant_id", 64)(&dto.tenant_id))
        .rule(|dto: &NovoCertificado| validation_rules::required("nome")(&dto.nome))
        .rule(|dto: &NovoCertificado| validation_rules::max_length("nome", 200)(&dto.nome))
        .rule(|dto: &NovoCertificado| validation_rules::cnpj_digits("cnpj")(&dto.cnpj))
        .rule(|dto: &NovoCertificado| validation_rules::uf("uf")(&dto.uf))
        .rule(|dto: &NovoCertificado| {
            if dto.arquivo_pfx.is_empty() {
                Err(ServiceError::bad_request("arquivo_pfx is required"))
            } else {
                Ok(())
            }
        })
        .rule(|dto: &NovoCertificado| {
            if dto.validade_inicio > dto.validade_fim {
                Err(ServiceError::bad_request(
                    "validade_inicio must not be after validade_fim",
                ))
            } else {
                Ok(())
            }
        })
        .rule(|dto: &NovoCertificado| {
            validation_rules::range("intervalo_consulta", 1, 24 * 60)(&dto.intervalo_consulta)
        })
}

pub fn validate_novo_certificado(dto: &NovoCertificado) -> Result<(), ServiceError> {
    static VALIDATOR: OnceCell<Validator<NovoCertificado>> = OnceCell::new();
    VALIDATOR.get_or_init(novo_certificado_validator).validate(dto)
}
