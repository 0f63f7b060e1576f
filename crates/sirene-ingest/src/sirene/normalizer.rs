//! Raw row -> canonical entity mapping

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::str::FromStr;

use super::fields::{self, PartialDatePolicy};
use super::models::{Establishment, LegalUnit};
use crate::error::RecordError;
use crate::pipeline::types::{Normalizer, RawRecord};

/// What to keep in the `raw` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawPayloadMode {
    #[default]
    None,
    /// The whole source row as a JSON object
    Row,
}

impl FromStr for RawPayloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "row" => Ok(Self::Row),
            other => Err(format!("unknown raw payload mode '{other}'")),
        }
    }
}

/// Per-job normalization knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldOptions {
    pub partial_dates: PartialDatePolicy,
    pub raw_payload: RawPayloadMode,
}

impl FieldOptions {
    fn raw(&self, raw: &RawRecord) -> Option<serde_json::Value> {
        match self.raw_payload {
            RawPayloadMode::None => None,
            RawPayloadMode::Row => Some(raw.to_json()),
        }
    }
}

/// Entities buildable from a raw row
pub trait FromRawRecord: Sized {
    fn from_raw(raw: &RawRecord, options: &FieldOptions) -> Result<Self, RecordError>;
}

fn invalid_key(raw: &RawRecord, field: &'static str, value: Option<&str>) -> RecordError {
    RecordError::InvalidKey {
        row: raw.row(),
        field,
        value: value.map(str::to_owned),
    }
}

impl FromRawRecord for LegalUnit {
    fn from_raw(raw: &RawRecord, options: &FieldOptions) -> Result<Self, RecordError> {
        let cell = |column: &str| raw.get(column);
        let date = |column: &str| fields::date(cell(column), options.partial_dates);

        let siren = fields::digits(cell("siren"), 9)
            .ok_or_else(|| invalid_key(raw, "siren", cell("siren")))?;

        Ok(LegalUnit {
            siren,
            statut_diffusion: fields::text(cell("statutDiffusionUniteLegale")),
            etat_administratif: fields::text(cell("etatAdministratifUniteLegale")),
            date_creation: date("dateCreationUniteLegale"),
            denomination: fields::text(cell("denominationUniteLegale")),
            denomination_usuelle1: fields::text(cell("denominationUsuelle1UniteLegale")),
            denomination_usuelle2: fields::text(cell("denominationUsuelle2UniteLegale")),
            denomination_usuelle3: fields::text(cell("denominationUsuelle3UniteLegale")),
            nom: fields::text(cell("nomUniteLegale")),
            nom_usage: fields::text(cell("nomUsageUniteLegale")),
            sigle: fields::text(cell("sigleUniteLegale")),
            prenom1: fields::text(cell("prenom1UniteLegale")),
            prenom2: fields::text(cell("prenom2UniteLegale")),
            prenom3: fields::text(cell("prenom3UniteLegale")),
            prenom4: fields::text(cell("prenom4UniteLegale")),
            categorie_juridique: fields::text(cell("categorieJuridiqueUniteLegale")),
            activite_principale: fields::code(cell("activitePrincipaleUniteLegale")),
            nomenclature_activite: fields::text(cell("nomenclatureActiviteUniteLegale")),
            tranche_effectifs: fields::text(cell("trancheEffectifsUniteLegale")),
            annee_effectifs: fields::integer(cell("anneeEffectifsUniteLegale")),
            categorie_entreprise: fields::text(cell("categorieEntreprise")),
            annee_categorie_entreprise: fields::integer(cell("anneeCategorieEntreprise")),
            nic_siege: fields::text(cell("nicSiegeUniteLegale")),
            ess: fields::boolean(cell("economieSocialeSolidaireUniteLegale")),
            societe_mission: fields::boolean(cell("societeMissionUniteLegale")),
            caractere_employeur: fields::boolean(cell("caractereEmployeurUniteLegale")),
            date_dernier_traitement: fields::timestamp(cell("dateDernierTraitementUniteLegale")),
            date_debut: date("dateDebut"),
            raw: options.raw(raw),
        })
    }
}

impl FromRawRecord for Establishment {
    fn from_raw(raw: &RawRecord, options: &FieldOptions) -> Result<Self, RecordError> {
        let cell = |column: &str| raw.get(column);
        let date = |column: &str| fields::date(cell(column), options.partial_dates);

        let (siret, siren, nic) = establishment_key(raw)?;

        Ok(Establishment {
            siret,
            siren,
            nic,
            etablissement_siege: fields::boolean(cell("etablissementSiege")),
            etat_administratif: fields::text(cell("etatAdministratifEtablissement")),
            date_creation: date("dateCreationEtablissement"),
            date_debut: date("dateDebut"),
            date_dernier_traitement: fields::timestamp(cell("dateDernierTraitementEtablissement")),
            enseigne1: fields::text(cell("enseigne1Etablissement")),
            enseigne2: fields::text(cell("enseigne2Etablissement")),
            enseigne3: fields::text(cell("enseigne3Etablissement")),
            denomination_usuelle: fields::text(cell("denominationUsuelleEtablissement")),
            complement_adresse: fields::text(cell("complementAdresseEtablissement")),
            numero_voie: fields::text(cell("numeroVoieEtablissement")),
            type_voie: fields::text(cell("typeVoieEtablissement")),
            libelle_voie: fields::text(cell("libelleVoieEtablissement")),
            code_postal: fields::text(cell("codePostalEtablissement")),
            libelle_commune: fields::text(cell("libelleCommuneEtablissement")),
            code_commune: fields::text(cell("codeCommuneEtablissement")),
            code_cedex: fields::text(cell("codeCedexEtablissement")),
            libelle_cedex: fields::text(cell("libelleCedexEtablissement")),
            pays_code: fields::text(cell("codePaysEtrangerEtablissement")),
            pays_libelle: fields::text(cell("libellePaysEtrangerEtablissement")),
            activite_principale: fields::code(cell("activitePrincipaleEtablissement")),
            nomenclature_activite: fields::text(cell("nomenclatureActiviteEtablissement")),
            tranche_effectifs: fields::text(cell("trancheEffectifsEtablissement")),
            annee_effectifs: fields::integer(cell("anneeEffectifsEtablissement")),
            raw: options.raw(raw),
        })
    }
}

/// `(siret, siren, nic)` from whichever key cells the row carries
fn establishment_key(raw: &RawRecord) -> Result<(String, String, String), RecordError> {
    let siren_cell = fields::text(raw.get("siren"));
    let nic_cell = fields::text(raw.get("nic"));

    let Some(siret_cell) = fields::text(raw.get("siret")) else {
        let siren = fields::digits(siren_cell.as_deref(), 9)
            .ok_or_else(|| invalid_key(raw, "siren", siren_cell.as_deref()))?;
        let nic = fields::digits(nic_cell.as_deref(), 5)
            .ok_or_else(|| invalid_key(raw, "nic", nic_cell.as_deref()))?;
        return Ok((format!("{siren}{nic}"), siren, nic));
    };

    let siret = fields::digits(Some(siret_cell.as_str()), 14)
        .ok_or_else(|| invalid_key(raw, "siret", Some(siret_cell.as_str())))?;
    let (siren, nic) = siret.split_at(9);

    for (field, cell, part) in [("siren", &siren_cell, siren), ("nic", &nic_cell, nic)] {
        if let Some(value) = cell.as_deref() {
            if value != part {
                return Err(invalid_key(raw, field, Some(value)));
            }
        }
    }

    Ok((siret.clone(), siren.to_string(), nic.to_string()))
}

/// [`Normalizer`] stage for any entity with a raw mapping
pub struct RecordNormalizer<E> {
    options: FieldOptions,
    _entity: PhantomData<fn() -> E>,
}

impl<E> RecordNormalizer<E> {
    pub fn new(options: FieldOptions) -> Self {
        Self {
            options,
            _entity: PhantomData,
        }
    }
}

impl<E: FromRawRecord> Normalizer<E> for RecordNormalizer<E> {
    fn normalize(&self, raw: &RawRecord) -> Result<E, RecordError> {
        E::from_raw(raw, &self.options)
    }
}
